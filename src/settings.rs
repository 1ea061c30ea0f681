use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    actuator::ActuatorTiming,
    dedup::DedupConfig,
    models::{LaneId, LaneRole},
    recognition::{RecognizerConfig, ValidationConfig},
    sensing::{DetectorConfig, SourceConfig},
};

pub const CONFIG_PATH_ENV: &str = "PLATEGATE_CONFIG";
pub const DATABASE_PATH_ENV: &str = "PLATEGATE_DB";
pub const API_KEY_ENV: &str = "PLATE_RECOGNIZER_API_KEY";
pub const DEBUG_ENV: &str = "PLATEGATE_DEBUG";

const DEFAULT_CONFIG_PATH: &str = "plategate.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneSettings {
    pub id: LaneId,
    #[serde(default)]
    pub role: LaneRole,
    pub source: SourceConfig,
    #[serde(default)]
    pub fallback_source: Option<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingSettings {
    pub dedup_cooldown_secs: u64,
    pub barrier_hold_secs: u64,
    pub authorized_tone_ms: u64,
    pub denied_tone_ms: u64,
    pub session_error_tone_ms: u64,
    /// Only every Nth frame is considered for detection.
    pub sample_every_n_frames: u64,
    pub min_detection_interval_ms: u64,
    pub recognition_timeout_ms: u64,
    /// Readings below this confidence are discarded.
    pub min_confidence: f32,
    pub max_source_retries: u32,
    pub source_retry_base_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            dedup_cooldown_secs: 10,
            barrier_hold_secs: 15,
            authorized_tone_ms: 2_000,
            denied_tone_ms: 1_000,
            session_error_tone_ms: 500,
            sample_every_n_frames: 30,
            min_detection_interval_ms: 2_000,
            recognition_timeout_ms: 5_000,
            min_confidence: 0.4,
            max_source_retries: 5,
            source_retry_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateSettings {
    pub database_path: PathBuf,
    /// Annotated JPEG per decision when set.
    pub snapshot_dir: Option<PathBuf>,
    pub lanes: Vec<LaneSettings>,
    pub recognizer: RecognizerConfig,
    pub validation: ValidationConfig,
    pub detector: DetectorConfig,
    pub timing: TimingSettings,
    pub dedup: DedupConfig,
    pub decision_history: usize,
    pub debug: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("plategate.db"),
            snapshot_dir: None,
            lanes: Vec::new(),
            recognizer: RecognizerConfig::default(),
            validation: ValidationConfig::default(),
            detector: DetectorConfig::default(),
            timing: TimingSettings::default(),
            dedup: DedupConfig::default(),
            decision_history: 50,
            debug: false,
        }
    }
}

impl GateSettings {
    /// Missing file means defaults; a file that does not parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Loads from `PLATEGATE_CONFIG` (or `plategate.json`) and applies
    /// environment overrides.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut settings = Self::load(&path)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DATABASE_PATH_ENV).filter(|v| !v.is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.is_empty()) {
            match &mut self.recognizer {
                RecognizerConfig::RemoteApi(remote) => remote.api_key = Some(key),
                RecognizerConfig::Hybrid(hybrid) => hybrid.remote.api_key = Some(key),
                _ => {}
            }
        }
        if let Some(flag) = lookup(DEBUG_ENV) {
            self.debug = flag == "1" || flag.eq_ignore_ascii_case("true");
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for lane in &self.lanes {
            if lane.id.as_str().is_empty() {
                bail!("lane id must not be empty");
            }
            if !seen.insert(lane.id.clone()) {
                bail!("duplicate lane id {}", lane.id);
            }
        }
        if self.timing.sample_every_n_frames == 0 {
            bail!("timing.sampleEveryNFrames must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.timing.min_confidence) {
            bail!("timing.minConfidence must be within [0, 1]");
        }
        if self.detector.canny_thresholds.len() < 2 {
            bail!("detector.cannyThresholds needs at least two threshold pairs");
        }
        Ok(())
    }

    pub fn actuator_timing(&self) -> ActuatorTiming {
        ActuatorTiming {
            hold: Duration::from_secs(self.timing.barrier_hold_secs),
            authorized_tone: Duration::from_millis(self.timing.authorized_tone_ms),
            denied_tone: Duration::from_millis(self.timing.denied_tone_ms),
            session_error_tone: Duration::from_millis(self.timing.session_error_tone_ms),
        }
    }

    pub fn dedup_cooldown(&self) -> Duration {
        Duration::from_secs(self.timing.dedup_cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = GateSettings::load(&dir.path().join("absent.json")).expect("defaults");
        assert_eq!(settings.timing.barrier_hold_secs, 15);
        assert_eq!(settings.decision_history, 50);
        assert!(matches!(settings.recognizer, RecognizerConfig::LocalOcr(_)));
    }

    #[test]
    fn parses_lanes_and_partial_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plategate.json");
        fs::write(
            &path,
            r#"{
                "lanes": [
                    {"id": "entry", "role": "entry",
                     "source": {"kind": "httpSnapshot", "url": "http://cam-1/snapshot.jpg"},
                     "fallbackSource": {"kind": "directory", "path": "/var/lib/plategate/replay"}},
                    {"id": "exit", "role": "exit",
                     "source": {"kind": "directory", "path": "/tmp/exit", "looping": true}}
                ],
                "recognizer": {"backend": "remote_api", "regions": ["in"]},
                "timing": {"barrierHoldSecs": 12}
            }"#,
        )
        .expect("write");

        let mut settings = GateSettings::load(&path).expect("parse");
        settings.apply_overrides(|key| match key {
            API_KEY_ENV => Some("secret".to_string()),
            DATABASE_PATH_ENV => Some("/data/gate.db".to_string()),
            _ => None,
        });
        settings.validate().expect("valid");

        assert_eq!(settings.lanes.len(), 2);
        assert_eq!(settings.lanes[0].role, LaneRole::Entry);
        assert!(settings.lanes[0].fallback_source.is_some());
        assert_eq!(settings.timing.barrier_hold_secs, 12);
        assert_eq!(settings.timing.dedup_cooldown_secs, 10);
        assert_eq!(settings.database_path, PathBuf::from("/data/gate.db"));
        match &settings.recognizer {
            RecognizerConfig::RemoteApi(remote) => assert_eq!(remote.api_key.as_deref(), Some("secret")),
            other => panic!("unexpected recognizer {other:?}"),
        }
    }

    #[test]
    fn api_key_override_reaches_hybrid_remote() {
        let mut settings = GateSettings {
            recognizer: RecognizerConfig::Hybrid(Default::default()),
            ..GateSettings::default()
        };
        settings.apply_overrides(|key| (key == API_KEY_ENV).then(|| "secret".to_string()));
        match &settings.recognizer {
            RecognizerConfig::Hybrid(hybrid) => assert_eq!(hybrid.remote.api_key.as_deref(), Some("secret")),
            other => panic!("unexpected recognizer {other:?}"),
        }
    }

    #[test]
    fn malformed_file_and_duplicate_lanes_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ lanes: ").expect("write");
        assert!(GateSettings::load(&path).is_err());

        let lane = LaneSettings {
            id: LaneId::from("gate"),
            role: LaneRole::Gate,
            source: SourceConfig::Directory {
                path: PathBuf::from("/tmp"),
                frame_interval_ms: 33,
                looping: false,
            },
            fallback_source: None,
        };
        let settings = GateSettings {
            lanes: vec![lane.clone(), lane],
            ..GateSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
