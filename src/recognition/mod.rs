//! Plate text recognition. Backends sit behind [`TextRecognizer`] and are
//! chosen once at startup from [`RecognizerConfig`].

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::models::{Candidate, Frame, PlateReading};

pub mod hybrid;
pub mod local_ocr;
pub mod remote_api;
pub mod stub;
pub mod validator;

pub use hybrid::{HybridConfig, HybridRecognizer};
pub use local_ocr::{LocalOcrConfig, LocalOcrRecognizer};
pub use remote_api::{RemoteApiConfig, RemoteApiRecognizer};
pub use stub::{TestStubConfig, TestStubRecognizer};
pub use validator::{PlateValidator, ValidationConfig};

/// Confidence reported when a backend returns text without a score.
pub const UNSCORED_CONFIDENCE: f32 = 0.5;

/// Pixels added around a candidate before it is cropped for recognition.
pub const CROP_PADDING: u32 = 10;

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Source tag stamped on every [`PlateReading`].
    fn name(&self) -> &'static str;

    /// Never fails: any backend error is logged and reported as `None`.
    async fn recognize(&self, frame: &Frame, candidate: &Candidate) -> Option<PlateReading>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RecognizerConfig {
    LocalOcr(LocalOcrConfig),
    RemoteApi(RemoteApiConfig),
    Hybrid(HybridConfig),
    TestStub(TestStubConfig),
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        RecognizerConfig::LocalOcr(LocalOcrConfig::default())
    }
}

pub fn build_recognizer(config: &RecognizerConfig) -> Result<Arc<dyn TextRecognizer>> {
    let recognizer: Arc<dyn TextRecognizer> = match config {
        RecognizerConfig::LocalOcr(cfg) => Arc::new(LocalOcrRecognizer::new(cfg)),
        RecognizerConfig::RemoteApi(cfg) => Arc::new(RemoteApiRecognizer::new(cfg)?),
        RecognizerConfig::Hybrid(cfg) => Arc::new(HybridRecognizer::from_config(cfg)?),
        RecognizerConfig::TestStub(cfg) => Arc::new(TestStubRecognizer::new(cfg)),
    };
    Ok(recognizer)
}

/// Uppercases and drops everything outside A-Z / 0-9.
pub fn normalize_plate(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Crop of the candidate region with [`CROP_PADDING`], clamped to the frame.
pub fn crop_candidate(frame: &Frame, candidate: &Candidate) -> DynamicImage {
    let region = candidate
        .bbox()
        .padded(CROP_PADDING, frame.width(), frame.height());
    frame
        .image
        .crop_imm(region.x, region.y, region.width, region.height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_separators_and_case() {
        assert_eq!(normalize_plate(" ka-01 ab.1234\n"), "KA01AB1234");
        assert_eq!(normalize_plate("--"), "");
    }

    #[test]
    fn recognizer_config_selects_backend_by_tag() {
        let cfg: RecognizerConfig =
            serde_json::from_str(r#"{"backend":"test_stub","plates":["KA01AB1234"]}"#).expect("parse");
        assert!(matches!(cfg, RecognizerConfig::TestStub(_)));
        let recognizer = build_recognizer(&cfg).expect("build");
        assert_eq!(recognizer.name(), "test_stub");

        let cfg: RecognizerConfig = serde_json::from_str(r#"{"backend":"local_ocr"}"#).expect("parse");
        assert!(matches!(cfg, RecognizerConfig::LocalOcr(_)));

        let cfg: RecognizerConfig = serde_json::from_str(
            r#"{"backend":"hybrid","remote":{"endpoint":"http://127.0.0.1:9/","timeoutMs":500}}"#,
        )
        .expect("parse");
        match &cfg {
            RecognizerConfig::Hybrid(hybrid) => assert_eq!(hybrid.remote.timeout_ms, 500),
            other => panic!("unexpected backend {other:?}"),
        }
        assert_eq!(build_recognizer(&cfg).expect("build").name(), "hybrid");
    }
}
