use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::models::{Candidate, Frame, PlateReading};

use super::{normalize_plate, TextRecognizer};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestStubConfig {
    pub plates: Vec<String>,
    pub confidence: f32,
}

impl Default for TestStubConfig {
    fn default() -> Self {
        Self {
            plates: Vec::new(),
            confidence: 0.9,
        }
    }
}

/// Deterministic recognizer for tests and dry runs: hands out the configured
/// plates in order, one per call, cycling. Readings are synthetic and carry
/// the `test_stub` source tag.
pub struct TestStubRecognizer {
    plates: Vec<String>,
    confidence: f32,
    cursor: AtomicUsize,
}

impl TestStubRecognizer {
    pub fn new(config: &TestStubConfig) -> Self {
        warn!(
            "test stub recognizer active: plate readings are synthetic ({} scripted)",
            config.plates.len()
        );
        Self {
            plates: config.plates.iter().map(|p| normalize_plate(p)).collect(),
            confidence: config.confidence,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn with_plates<I, S>(plates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(&TestStubConfig {
            plates: plates.into_iter().map(Into::into).collect(),
            ..TestStubConfig::default()
        })
    }
}

#[async_trait]
impl TextRecognizer for TestStubRecognizer {
    fn name(&self) -> &'static str {
        "test_stub"
    }

    async fn recognize(&self, _frame: &Frame, candidate: &Candidate) -> Option<PlateReading> {
        if self.plates.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.plates.len();
        Some(PlateReading::new(
            self.plates[index].clone(),
            self.confidence,
            self.name(),
            candidate.bbox(),
            Utc::now(),
        ))
    }
}
