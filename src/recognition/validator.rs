use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::normalize_plate;

const REGION_CODES: &[&str] = &[
    "AP", "AR", "AS", "BR", "CG", "GA", "GJ", "HR", "HP", "JK", "JH", "KA", "KL", "MP", "MH", "MN",
    "ML", "MZ", "NL", "OD", "PB", "RJ", "SK", "TN", "TG", "TR", "UP", "UT", "WB", "AN", "CH", "DN",
    "DD", "DL", "LD", "PY", "BH",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationConfig {
    /// Anchored regexes over normalized text.
    pub grammars: Vec<String>,
    /// Leading two-letter codes accepted when no grammar matches.
    pub region_codes: Vec<String>,
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            grammars: vec![
                r"^[A-Z]{2}[0-9]{2}[A-Z]{2}[0-9]{4}$".to_string(),
                r"^[A-Z]{2}[0-9]{2}[A-Z]{1,3}[0-9]{3,4}$".to_string(),
                r"^[0-9]{2}BH[A-Z][0-9]{4}$".to_string(),
            ],
            region_codes: REGION_CODES.iter().map(|c| c.to_string()).collect(),
            min_length: 8,
            max_length: 12,
        }
    }
}

/// Pure plate-format check. Ambiguous text is rejected rather than guessed.
#[derive(Debug, Clone)]
pub struct PlateValidator {
    grammars: Vec<Regex>,
    region_codes: HashSet<String>,
    min_length: usize,
    max_length: usize,
}

impl PlateValidator {
    pub fn new(config: &ValidationConfig) -> Result<Self> {
        let grammars = config
            .grammars
            .iter()
            .map(|pattern| {
                Regex::new(pattern).with_context(|| format!("invalid plate grammar {pattern:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            grammars,
            region_codes: config.region_codes.iter().map(|c| c.to_ascii_uppercase()).collect(),
            min_length: config.min_length,
            max_length: config.max_length,
        })
    }

    pub fn is_valid(&self, text: &str) -> bool {
        let plate = normalize_plate(text);
        if plate.len() < self.min_length || plate.len() > self.max_length {
            return false;
        }
        if self.grammars.iter().any(|g| g.is_match(&plate)) {
            return true;
        }
        plate
            .get(..2)
            .map_or(false, |prefix| self.region_codes.contains(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PlateValidator {
        PlateValidator::new(&ValidationConfig::default()).expect("default grammars compile")
    }

    #[test]
    fn accepts_every_default_grammar() {
        let v = validator();
        for plate in ["KA01AB1234", "DL8CAF5031", "MH12D1433", "22BHA1234", "XX99ZZ0000"] {
            assert!(v.is_valid(plate), "{plate} should be valid");
        }
    }

    #[test]
    fn one_altered_character_breaks_the_match() {
        let v = validator();
        assert!(!v.is_valid("1A01AB1234"));
        assert!(!v.is_valid("ZZ01AB123X"));
        assert!(!v.is_valid("22XHA1234"));
    }

    #[test]
    fn normalizes_before_matching() {
        let v = validator();
        assert!(v.is_valid("ka 01 ab 1234"));
        assert!(v.is_valid("KA-01-AB-1234"));
    }

    #[test]
    fn enforces_length_bounds() {
        let v = validator();
        assert!(!v.is_valid("KA01A12"));
        assert!(!v.is_valid("KA01ABC12345678"));
    }

    #[test]
    fn region_code_fallback_covers_unlisted_layouts() {
        let v = validator();
        assert!(v.is_valid("TN0912345678"));
        assert!(!v.is_valid("XX0912345678"));
    }

    #[test]
    fn rejects_bad_grammar_config() {
        let config = ValidationConfig {
            grammars: vec!["([A-Z".to_string()],
            ..ValidationConfig::default()
        };
        assert!(PlateValidator::new(&config).is_err());
    }
}
