//! Frame origins for a lane. The core only needs `next_frame` and
//! `reconnect`; transport details stay behind [`FrameSource`].

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::models::{Frame, LaneId};

const ENABLE_LOGS: bool = true;

use crate::{lane_info, lane_warn};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame source exhausted")]
    EndOfStream,
    #[error("transient frame source failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Human-readable origin for logs.
    fn describe(&self) -> String;

    async fn next_frame(&mut self) -> Result<Frame, FrameError>;

    async fn reconnect(&mut self) -> Result<(), FrameError>;

    /// Frees camera handles. Called once on every lane exit path.
    async fn release(&mut self) {}
}

/// Per-lane camera descriptor from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SourceConfig {
    #[serde(rename_all = "camelCase")]
    Directory {
        path: PathBuf,
        #[serde(default = "default_frame_interval_ms")]
        frame_interval_ms: u64,
        #[serde(default)]
        looping: bool,
    },
    #[serde(rename_all = "camelCase")]
    HttpSnapshot {
        url: String,
        #[serde(default = "default_frame_interval_ms")]
        poll_interval_ms: u64,
        #[serde(default = "default_http_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_frame_interval_ms() -> u64 {
    33
}

fn default_http_timeout_ms() -> u64 {
    3_000
}

/// Builds the source for one lane, wrapping it with a fallback origin when
/// one is configured.
pub fn build_source(
    lane: &LaneId,
    primary: &SourceConfig,
    fallback: Option<&SourceConfig>,
) -> Result<Box<dyn FrameSource>> {
    let primary = build_single(lane, primary)?;
    match fallback {
        Some(config) => {
            let fallback = build_single(lane, config)?;
            Ok(Box::new(FallbackSource::new(lane.clone(), primary, fallback)))
        }
        None => Ok(primary),
    }
}

fn build_single(lane: &LaneId, config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    match config {
        SourceConfig::Directory {
            path,
            frame_interval_ms,
            looping,
        } => {
            let source = DirectorySource::open(
                lane.clone(),
                path,
                Duration::from_millis(*frame_interval_ms),
                *looping,
            )?;
            Ok(Box::new(source))
        }
        SourceConfig::HttpSnapshot {
            url,
            poll_interval_ms,
            timeout_ms,
        } => {
            let source = HttpSnapshotSource::new(
                lane.clone(),
                url.clone(),
                Duration::from_millis(*poll_interval_ms),
                Duration::from_millis(*timeout_ms),
            )?;
            Ok(Box::new(source))
        }
    }
}

/// Spaces successive reads `interval` apart without drifting on slow reads.
#[derive(Debug)]
struct Pacer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    async fn wait(&mut self) {
        if let Some(due) = self.next_due {
            tokio::time::sleep_until(due).await;
        }
        self.next_due = Some(Instant::now() + self.interval);
    }
}

/// Replays image files from a directory in lexical order.
pub struct DirectorySource {
    lane: LaneId,
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    sequence: u64,
    pacer: Pacer,
}

impl DirectorySource {
    pub fn open(lane: LaneId, dir: &Path, frame_interval: Duration, looping: bool) -> Result<Self> {
        let files = scan_images(dir)
            .with_context(|| format!("failed to list frames in {}", dir.display()))?;
        lane_info!(lane, "replaying {} frames from {}", files.len(), dir.display());
        Ok(Self {
            lane,
            dir: dir.to_path_buf(),
            files,
            cursor: 0,
            looping,
            sequence: 0,
            pacer: Pacer::new(frame_interval),
        })
    }
}

fn scan_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

#[async_trait]
impl FrameSource for DirectorySource {
    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }

    async fn next_frame(&mut self) -> Result<Frame, FrameError> {
        if self.cursor >= self.files.len() {
            if !self.looping || self.files.is_empty() {
                return Err(FrameError::EndOfStream);
            }
            self.cursor = 0;
        }

        self.pacer.wait().await;
        let path = self.files[self.cursor].clone();
        self.cursor += 1;

        let image = tokio::task::spawn_blocking(move || image::open(&path).map_err(|e| (path, e)))
            .await
            .map_err(|err| FrameError::Transient(format!("frame decode worker failed: {err}")))?
            .map_err(|(path, err)| {
                FrameError::Transient(format!("failed to decode {}: {err}", path.display()))
            })?;

        self.sequence += 1;
        Ok(Frame::new(self.lane.clone(), self.sequence, Utc::now(), image))
    }

    async fn reconnect(&mut self) -> Result<(), FrameError> {
        let files = scan_images(&self.dir)
            .map_err(|err| FrameError::Transient(format!("rescan of {} failed: {err}", self.dir.display())))?;
        self.files = files;
        self.cursor = self.cursor.min(self.files.len());
        Ok(())
    }
}

/// Polls a camera's still-image endpoint.
pub struct HttpSnapshotSource {
    lane: LaneId,
    url: String,
    timeout: Duration,
    client: Client,
    sequence: u64,
    pacer: Pacer,
}

impl HttpSnapshotSource {
    pub fn new(lane: LaneId, url: String, poll_interval: Duration, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build snapshot HTTP client")?;
        Ok(Self {
            lane,
            url,
            timeout,
            client,
            sequence: 0,
            pacer: Pacer::new(poll_interval),
        })
    }
}

#[async_trait]
impl FrameSource for HttpSnapshotSource {
    fn describe(&self) -> String {
        format!("snapshot {}", self.url)
    }

    async fn next_frame(&mut self) -> Result<Frame, FrameError> {
        self.pacer.wait().await;

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                FrameError::Transient(format!("snapshot timed out after {:?}", self.timeout))
            } else {
                FrameError::Transient(format!("snapshot request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FrameError::Transient(format!("snapshot returned HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FrameError::Transient(format!("snapshot body read failed: {e}")))?;

        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|err| FrameError::Transient(format!("frame decode worker failed: {err}")))?
            .map_err(|err| FrameError::Transient(format!("snapshot decode failed: {err}")))?;

        self.sequence += 1;
        Ok(Frame::new(self.lane.clone(), self.sequence, Utc::now(), image))
    }

    async fn reconnect(&mut self) -> Result<(), FrameError> {
        self.client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| FrameError::Transient(format!("failed to rebuild HTTP client: {e}")))?;
        Ok(())
    }
}

/// Scripted frames and failures, consumed in order. Used for replays and tests.
pub struct MemorySource {
    lane: LaneId,
    script: VecDeque<Result<(DynamicImage, DateTime<Utc>), FrameError>>,
    sequence: u64,
    reconnects: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl MemorySource {
    pub fn new(lane: LaneId) -> Self {
        Self {
            lane,
            script: VecDeque::new(),
            sequence: 0,
            reconnects: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push_frame(&mut self, image: DynamicImage, captured_at: DateTime<Utc>) {
        self.script.push_back(Ok((image, captured_at)));
    }

    pub fn push_error(&mut self, error: FrameError) {
        self.script.push_back(Err(error));
    }

    /// Counter of `reconnect` calls, readable after the source is moved.
    pub fn reconnect_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reconnects)
    }

    /// Set once `release` has run.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory ({} scripted)", self.script.len())
    }

    async fn next_frame(&mut self) -> Result<Frame, FrameError> {
        match self.script.pop_front() {
            Some(Ok((image, captured_at))) => {
                self.sequence += 1;
                Ok(Frame::new(self.lane.clone(), self.sequence, captured_at, image))
            }
            Some(Err(err)) => Err(err),
            None => Err(FrameError::EndOfStream),
        }
    }

    async fn reconnect(&mut self) -> Result<(), FrameError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Consecutive read failures of the active origin before a reconnect hands
/// over to the other one, even when the active origin reports it reconnected.
const FAILOVER_AFTER: u32 = 2;

/// Primary origin with a standby, e.g. a network stream backed by a local
/// device. The active origin is swapped when its reconnect fails or when it
/// keeps failing reads after reconnecting.
pub struct FallbackSource {
    lane: LaneId,
    primary: Box<dyn FrameSource>,
    fallback: Box<dyn FrameSource>,
    on_fallback: bool,
    active_failures: u32,
}

impl FallbackSource {
    pub fn new(lane: LaneId, primary: Box<dyn FrameSource>, fallback: Box<dyn FrameSource>) -> Self {
        Self {
            lane,
            primary,
            fallback,
            on_fallback: false,
            active_failures: 0,
        }
    }

    pub fn on_fallback(&self) -> bool {
        self.on_fallback
    }

    fn active(&mut self) -> &mut Box<dyn FrameSource> {
        if self.on_fallback {
            &mut self.fallback
        } else {
            &mut self.primary
        }
    }

    fn origins(&self) -> (&dyn FrameSource, &dyn FrameSource) {
        if self.on_fallback {
            (&*self.fallback, &*self.primary)
        } else {
            (&*self.primary, &*self.fallback)
        }
    }

    fn switch(&mut self, reason: &str) {
        let (from, to) = self.origins();
        lane_warn!(
            self.lane,
            "source {} unavailable ({reason}), switching to {}",
            from.describe(),
            to.describe()
        );
        self.on_fallback = !self.on_fallback;
        self.active_failures = 0;
    }
}

#[async_trait]
impl FrameSource for FallbackSource {
    fn describe(&self) -> String {
        let (active, standby) = self.origins();
        format!("{} (standby: {})", active.describe(), standby.describe())
    }

    async fn next_frame(&mut self) -> Result<Frame, FrameError> {
        let result = self.active().next_frame().await;
        match &result {
            Ok(_) => self.active_failures = 0,
            Err(FrameError::Transient(_)) => self.active_failures += 1,
            Err(FrameError::EndOfStream) => {}
        }
        result
    }

    async fn reconnect(&mut self) -> Result<(), FrameError> {
        if self.active_failures >= FAILOVER_AFTER {
            let reason = format!("{} failed reads", self.active_failures);
            self.switch(&reason);
        } else {
            let outcome = self.active().reconnect().await;
            match outcome {
                Ok(()) => return Ok(()),
                Err(err) => self.switch(&err.to_string()),
            }
        }

        let restored = self.active().reconnect().await;
        if restored.is_ok() && !self.on_fallback {
            lane_info!(self.lane, "primary source {} restored", self.primary.describe());
        }
        restored
    }

    async fn release(&mut self) {
        self.primary.release().await;
        self.fallback.release().await;
    }
}
