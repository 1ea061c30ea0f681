use std::{io::Cursor, path::PathBuf, process::Stdio, time::Duration};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use image::{imageops::FilterType, DynamicImage, ImageFormat};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, process::Command};

use crate::models::{Candidate, Frame, PlateReading};
use crate::sensing::imaging::binarize;

use super::{crop_candidate, normalize_plate, TextRecognizer, UNSCORED_CONFIDENCE};

const WHITELIST: &str = "tessedit_char_whitelist=ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const OCR_WIDTH: u32 = 300;
const OCR_HEIGHT: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalOcrConfig {
    pub tesseract_path: PathBuf,
    /// Page segmentation modes tried per region; best mean confidence wins.
    pub page_segmentation_modes: Vec<u8>,
    pub timeout_ms: u64,
}

impl Default for LocalOcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: PathBuf::from("tesseract"),
            page_segmentation_modes: vec![7, 8, 13],
            timeout_ms: 3_000,
        }
    }
}

/// Runs the `tesseract` CLI on a binarised crop of each candidate.
pub struct LocalOcrRecognizer {
    binary: PathBuf,
    modes: Vec<u8>,
    timeout: Duration,
}

impl LocalOcrRecognizer {
    pub fn new(config: &LocalOcrConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            modes: config.page_segmentation_modes.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    async fn run_mode(&self, png: &[u8], psm: u8) -> Result<Option<(String, f32)>> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "--oem", "3", "--psm"])
            .arg(psm.to_string())
            .args(["-c", WHITELIST, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch {}", self.binary.display()))?;

        let mut stdin = child.stdin.take().context("tesseract stdin unavailable")?;
        stdin
            .write_all(png)
            .await
            .context("failed to stream crop to tesseract")?;
        drop(stdin);

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("tesseract psm {psm} timed out after {:?}", self.timeout))?
            .context("tesseract did not exit cleanly")?;

        if !output.status.success() {
            bail!("tesseract psm {psm} exited with {}", output.status);
        }
        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Grayscale, fixed-size, Otsu-binarised PNG of the crop.
fn prepare_crop(crop: &DynamicImage) -> Result<Vec<u8>> {
    let gray = crop.to_luma8();
    let resized = image::imageops::resize(&gray, OCR_WIDTH, OCR_HEIGHT, FilterType::CatmullRom);
    let binary = binarize(&resized);

    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(binary)
        .write_to(&mut buffer, ImageFormat::Png)
        .context("failed to encode OCR crop")?;
    Ok(buffer.into_inner())
}

/// Joins word-level rows of tesseract TSV output. Confidence is the mean of
/// the word confidences, scaled to [0, 1].
fn parse_tsv(tsv: &str) -> Option<(String, f32)> {
    let mut text = String::new();
    let mut confidences = Vec::new();

    for line in tsv.lines().skip(1) {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 12 || columns[0] != "5" {
            continue;
        }
        let word = normalize_plate(columns[11]);
        if word.is_empty() {
            continue;
        }
        text.push_str(&word);
        if let Ok(conf) = columns[10].trim().parse::<f32>() {
            if conf >= 0.0 {
                confidences.push(conf / 100.0);
            }
        }
    }

    if text.is_empty() {
        return None;
    }
    let confidence = if confidences.is_empty() {
        UNSCORED_CONFIDENCE
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };
    Some((text, confidence))
}

#[async_trait]
impl TextRecognizer for LocalOcrRecognizer {
    fn name(&self) -> &'static str {
        "local_ocr"
    }

    async fn recognize(&self, frame: &Frame, candidate: &Candidate) -> Option<PlateReading> {
        let crop = crop_candidate(frame, candidate);
        let png = match tokio::task::spawn_blocking(move || prepare_crop(&crop)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                warn!("OCR crop preparation failed: {err:?}");
                return None;
            }
            Err(err) => {
                warn!("OCR crop worker failed: {err}");
                return None;
            }
        };

        let mut best: Option<(String, f32)> = None;
        for &psm in &self.modes {
            match self.run_mode(&png, psm).await {
                Ok(Some((text, confidence))) => {
                    debug!("tesseract psm {psm} read {text} ({confidence:.2})");
                    if best.as_ref().map_or(true, |(_, c)| confidence > *c) {
                        best = Some((text, confidence));
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("{err:?}"),
            }
        }

        best.map(|(text, confidence)| {
            PlateReading::new(text, confidence, self.name(), candidate.bbox(), Utc::now())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn tsv_words_are_joined_and_scored() {
        let tsv = format!(
            "{HEADER}\n1\t1\t0\t0\t0\t0\t0\t0\t300\t100\t-1\t\n5\t1\t1\t1\t1\t1\t10\t20\t120\t60\t90.0\tKA01\n5\t1\t1\t1\t1\t2\t140\t20\t140\t60\t70.0\tab-1234\n"
        );
        let (text, confidence) = parse_tsv(&tsv).expect("reading");
        assert_eq!(text, "KA01AB1234");
        assert!((confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn empty_tsv_yields_nothing() {
        assert!(parse_tsv(HEADER).is_none());
        let blank_word = format!("{HEADER}\n5\t1\t1\t1\t1\t1\t0\t0\t1\t1\t95\t  \n");
        assert!(parse_tsv(&blank_word).is_none());
    }

    #[test]
    fn crop_is_encoded_at_working_size() {
        let crop = DynamicImage::new_luma8(120, 40);
        let png = prepare_crop(&crop).expect("encode");
        let decoded = image::load_from_memory(&png).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (OCR_WIDTH, OCR_HEIGHT));
    }
}
