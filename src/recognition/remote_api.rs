use std::{io::Cursor, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use image::{DynamicImage, ImageFormat};
use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::{Candidate, Frame, PlateReading};

use super::{crop_candidate, normalize_plate, TextRecognizer, UNSCORED_CONFIDENCE};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteApiConfig {
    pub endpoint: String,
    /// Sent as `Authorization: Token <key>`. `PLATE_RECOGNIZER_API_KEY` overrides it.
    pub api_key: Option<String>,
    pub regions: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.platerecognizer.com/v1/plate-reader/".to_string(),
            api_key: None,
            regions: vec!["in".to_string()],
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReaderResponse {
    #[serde(default)]
    results: Vec<ReaderResult>,
}

#[derive(Debug, Deserialize)]
struct ReaderResult {
    plate: String,
    #[serde(default)]
    score: Option<f32>,
}

/// Plate-Recognizer-compatible HTTP backend. Every failure (timeout, non-2xx,
/// malformed body) is logged and yields no reading.
pub struct RemoteApiRecognizer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    regions: Vec<String>,
}

impl RemoteApiRecognizer {
    pub fn new(config: &RemoteApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build recognition HTTP client")?;

        if config.api_key.is_none() {
            warn!("remote recognizer configured without an API key");
        }

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            regions: config.regions.clone(),
        })
    }

    async fn request(&self, payload: String) -> Result<Option<(String, f32)>> {
        let mut form: Vec<(&str, &str)> = vec![("upload", payload.as_str())];
        for region in &self.regions {
            form.push(("regions", region.as_str()));
        }

        let mut request = self.client.post(&self.endpoint).form(&form);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Token {key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!("recognition request timed out")
            } else {
                anyhow::anyhow!("recognition request failed: {e}")
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("recognition API returned {status}: {body}");
        }

        let parsed: ReaderResponse = response
            .json()
            .await
            .context("malformed recognition API response")?;
        Ok(best_result(parsed))
    }
}

fn best_result(response: ReaderResponse) -> Option<(String, f32)> {
    response
        .results
        .into_iter()
        .filter_map(|r| {
            let text = normalize_plate(&r.plate);
            (!text.is_empty()).then(|| (text, r.score.unwrap_or(UNSCORED_CONFIDENCE)))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

fn encode_crop(crop: &DynamicImage) -> Result<String> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(crop.to_rgb8())
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .context("failed to encode recognition payload")?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

#[async_trait]
impl TextRecognizer for RemoteApiRecognizer {
    fn name(&self) -> &'static str {
        "remote_api"
    }

    async fn recognize(&self, frame: &Frame, candidate: &Candidate) -> Option<PlateReading> {
        let crop = crop_candidate(frame, candidate);
        let payload = match tokio::task::spawn_blocking(move || encode_crop(&crop)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(err)) => {
                warn!("{err:?}");
                return None;
            }
            Err(err) => {
                warn!("recognition payload worker failed: {err}");
                return None;
            }
        };

        match self.request(payload).await {
            Ok(Some((text, confidence))) => {
                debug!("remote recognizer read {text} ({confidence:.2})");
                Some(PlateReading::new(text, confidence, self.name(), candidate.bbox(), Utc::now()))
            }
            Ok(None) => None,
            Err(err) => {
                warn!("{err:?}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_scoring_plate() {
        let body = r#"{"results":[{"plate":"ka01ab1234","score":0.71},{"plate":"mh12de1433","score":0.93},{"plate":"","score":0.99}]}"#;
        let parsed: ReaderResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(best_result(parsed), Some(("MH12DE1433".to_string(), 0.93)));
    }

    #[test]
    fn unscored_results_use_baseline_confidence() {
        let parsed: ReaderResponse = serde_json::from_str(r#"{"results":[{"plate":"dl8caf5031"}]}"#).expect("parse");
        assert_eq!(best_result(parsed), Some(("DL8CAF5031".to_string(), UNSCORED_CONFIDENCE)));

        let empty: ReaderResponse = serde_json::from_str("{}").expect("parse");
        assert_eq!(best_result(empty), None);
    }

    #[test]
    fn payload_is_base64_jpeg() {
        let crop = DynamicImage::new_rgb8(40, 20);
        let payload = encode_crop(&crop).expect("encode");
        let bytes = STANDARD.decode(payload).expect("base64");
        assert_eq!(image::guess_format(&bytes).expect("format"), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_soft() {
        let recognizer = RemoteApiRecognizer::new(&RemoteApiConfig {
            endpoint: "http://127.0.0.1:9/v1/plate-reader/".to_string(),
            api_key: Some("test".into()),
            timeout_ms: 500,
            ..RemoteApiConfig::default()
        })
        .expect("client");
        assert!(recognizer.request("AAAA".to_string()).await.is_err());
    }
}
