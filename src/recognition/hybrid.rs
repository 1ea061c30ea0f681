use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::models::{Candidate, Frame, PlateReading};

use super::{LocalOcrConfig, LocalOcrRecognizer, RemoteApiConfig, RemoteApiRecognizer, TextRecognizer};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HybridConfig {
    pub remote: RemoteApiConfig,
    pub local: LocalOcrConfig,
}

/// Remote service first, on-device OCR when the service is down, slow or has
/// nothing to say. Readings keep the tag of whichever engine produced them.
pub struct HybridRecognizer {
    primary: Arc<dyn TextRecognizer>,
    fallback: Arc<dyn TextRecognizer>,
}

impl HybridRecognizer {
    pub fn new(primary: Arc<dyn TextRecognizer>, fallback: Arc<dyn TextRecognizer>) -> Self {
        Self { primary, fallback }
    }

    pub fn from_config(config: &HybridConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(RemoteApiRecognizer::new(&config.remote)?),
            Arc::new(LocalOcrRecognizer::new(&config.local)),
        ))
    }
}

#[async_trait]
impl TextRecognizer for HybridRecognizer {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn recognize(&self, frame: &Frame, candidate: &Candidate) -> Option<PlateReading> {
        if let Some(reading) = self.primary.recognize(frame, candidate).await {
            return Some(reading);
        }
        debug!(
            "{} returned nothing, trying {}",
            self.primary.name(),
            self.fallback.name()
        );
        self.fallback.recognize(frame, candidate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{BoundingBox, CandidateBounds, LaneId, RegionMetrics},
        recognition::TestStubRecognizer,
    };
    use chrono::Utc;
    use image::DynamicImage;

    fn frame() -> Frame {
        Frame::new(LaneId::from("entry"), 1, Utc::now(), DynamicImage::new_rgb8(320, 240))
    }

    fn candidate() -> Candidate {
        let bounds = CandidateBounds {
            min_area: 0.0,
            max_area: f64::MAX,
            min_aspect_ratio: 0.0,
            max_aspect_ratio: f64::MAX,
            min_solidity: 0.0,
            min_extent: 0.0,
        };
        let metrics = RegionMetrics {
            bbox: BoundingBox::new(40, 40, 120, 40),
            area: 4_000.0,
            hull_area: 4_200.0,
        };
        Candidate::accept(metrics, &bounds).expect("candidate")
    }

    fn dead_remote() -> Arc<dyn TextRecognizer> {
        Arc::new(
            RemoteApiRecognizer::new(&RemoteApiConfig {
                endpoint: "http://127.0.0.1:9/v1/plate-reader/".to_string(),
                api_key: Some("test".into()),
                timeout_ms: 500,
                ..RemoteApiConfig::default()
            })
            .expect("client"),
        )
    }

    #[tokio::test]
    async fn falls_back_to_local_engine_when_remote_fails() {
        let local: Arc<dyn TextRecognizer> = Arc::new(TestStubRecognizer::with_plates(["MH12DE1433"]));
        let hybrid = HybridRecognizer::new(dead_remote(), local);
        let candidate = candidate();

        let reading = hybrid.recognize(&frame(), &candidate).await.expect("local reading");
        assert_eq!(reading.text, "MH12DE1433");
        assert_eq!(reading.source, "test_stub");
        assert_eq!(hybrid.name(), "hybrid");
    }

    #[tokio::test]
    async fn primary_reading_wins() {
        let primary: Arc<dyn TextRecognizer> = Arc::new(TestStubRecognizer::with_plates(["KA01AB1234"]));
        let local = Arc::new(TestStubRecognizer::with_plates(["DL8CAF5031"]));
        let hybrid = HybridRecognizer::new(primary, local.clone());
        let candidate = candidate();

        let reading = hybrid.recognize(&frame(), &candidate).await.expect("reading");
        assert_eq!(reading.text, "KA01AB1234");
        // fallback untouched, so its first plate is still next
        let untouched = local.recognize(&frame(), &candidate).await.expect("reading");
        assert_eq!(untouched.text, "DL8CAF5031");
    }
}
