use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    actuator::{ActuatorController, SignalOutcome},
    authorization::AuthorizationStore,
    dedup::DedupCache,
    models::{Candidate, Decision, DenialReason, Frame, LaneId, LaneRole, Outcome, PlateReading},
    recognition::{PlateValidator, TextRecognizer},
    sensing::{draw_candidates, CandidateDetector, FrameError, FrameSource},
    settings::GateSettings,
};

use super::{
    decisions::DecisionLog,
    state::{LaneSnapshot, LaneStage, LaneState},
};

const ENABLE_LOGS: bool = true;

use crate::{lane_debug, lane_error, lane_info, lane_warn};

const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Cadence and failure policy for one lane loop.
#[derive(Debug, Clone)]
pub struct LanePolicy {
    pub sample_every: u64,
    pub min_interval: chrono::Duration,
    pub recognition_timeout: Duration,
    pub min_confidence: f32,
    pub max_source_retries: u32,
    pub retry_base: Duration,
    pub snapshot_dir: Option<PathBuf>,
}

impl LanePolicy {
    pub fn from_settings(settings: &GateSettings) -> Self {
        let timing = &settings.timing;
        Self {
            sample_every: timing.sample_every_n_frames.max(1),
            min_interval: chrono::Duration::milliseconds(timing.min_detection_interval_ms as i64),
            recognition_timeout: Duration::from_millis(timing.recognition_timeout_ms),
            min_confidence: timing.min_confidence,
            max_source_retries: timing.max_source_retries,
            retry_base: Duration::from_millis(timing.source_retry_base_ms),
            snapshot_dir: settings.snapshot_dir.clone(),
        }
    }

    /// Exponential with up to 50% jitter, capped.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .retry_base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(10))
            .min(MAX_RETRY_BACKOFF);
        let jitter = rand::thread_rng().gen_range(0.0..0.5);
        exp.mul_f64(1.0 + jitter)
    }
}

/// Components shared by every lane. Constructed once at startup.
#[derive(Clone)]
pub struct PipelineDeps {
    pub detector: Arc<CandidateDetector>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub validator: Arc<PlateValidator>,
    pub dedup: Arc<DedupCache>,
    pub store: AuthorizationStore,
    pub actuator: ActuatorController,
    pub decisions: Arc<DecisionLog>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneExit {
    Stopped,
    EndOfStream,
}

pub struct LaneOrchestrator {
    lane: LaneId,
    role: LaneRole,
    source: Box<dyn FrameSource>,
    deps: PipelineDeps,
    policy: LanePolicy,
    state: LaneState,
}

impl LaneOrchestrator {
    pub fn new(
        lane: LaneId,
        role: LaneRole,
        source: Box<dyn FrameSource>,
        deps: PipelineDeps,
        policy: LanePolicy,
    ) -> (Self, watch::Receiver<LaneSnapshot>) {
        let (state, receiver) = LaneState::new(lane.clone(), role, source.describe());
        (
            Self {
                lane,
                role,
                source,
                deps,
                policy,
                state,
            },
            receiver,
        )
    }

    pub fn lane(&self) -> &LaneId {
        &self.lane
    }

    pub fn snapshot(&self) -> &LaneSnapshot {
        self.state.snapshot()
    }

    /// Runs until cancelled, the source ends, or the source stays broken past
    /// the retry limit. The source is released on every exit path.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<LaneExit> {
        lane_info!(&self.lane, "lane started ({:?}, source {})", self.role, self.source.describe());
        let result = self.drive(&cancel).await;
        self.source.release().await;

        match &result {
            Ok(exit) => {
                if !self.state.snapshot().degraded {
                    self.state.set_stage(LaneStage::Stopped);
                }
                lane_info!(&self.lane, "lane exited: {exit:?}");
            }
            Err(err) => lane_error!(&self.lane, "lane stopped: {err:?}"),
        }
        result
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<LaneExit> {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(LaneExit::Stopped),
                next = self.source.next_frame() => next,
            };

            match next {
                Ok(frame) => {
                    self.state.source_recovered();
                    self.process_frame(frame).await;
                }
                Err(FrameError::EndOfStream) => return Ok(LaneExit::EndOfStream),
                Err(FrameError::Transient(detail)) => {
                    if !self.recover_source(&detail, cancel).await? {
                        return Ok(LaneExit::Stopped);
                    }
                }
            }
        }
    }

    /// Backs off and reconnects. Returns false if cancelled while waiting.
    async fn recover_source(&mut self, detail: &str, cancel: &CancellationToken) -> Result<bool> {
        let attempt = self.state.source_failed();
        if attempt > self.policy.max_source_retries {
            self.state.mark_degraded();
            bail!(
                "frame source {} unreachable after {} attempts: {detail}",
                self.source.describe(),
                self.policy.max_source_retries
            );
        }

        let delay = self.policy.retry_delay(attempt);
        lane_warn!(
            &self.lane,
            "frame source error ({detail}); retry {attempt}/{} in {delay:?}",
            self.policy.max_source_retries
        );

        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            _ = tokio::time::sleep(delay) => {}
        }

        if let Err(err) = self.source.reconnect().await {
            lane_warn!(&self.lane, "reconnect failed: {err}");
        }
        Ok(true)
    }

    /// One detection cycle. Acts on at most one plate and returns its decision.
    pub async fn process_frame(&mut self, frame: Frame) -> Option<Decision> {
        let position = self.state.frame_seen();
        if (position - 1) % self.policy.sample_every != 0 {
            return None;
        }
        if let Some(last) = self.state.snapshot().last_trigger_at {
            if frame.captured_at - last < self.policy.min_interval {
                return None;
            }
        }
        self.state.frame_processed();
        self.state.set_stage(LaneStage::Idle);

        let frame = Arc::new(frame);
        let candidates = match self.detect(&frame).await {
            Ok(candidates) => candidates,
            Err(err) => {
                lane_error!(&self.lane, "candidate detection failed: {err:?}");
                return None;
            }
        };
        if candidates.is_empty() {
            return None;
        }
        self.state.set_stage(LaneStage::CandidateFound);

        for candidate in &candidates {
            let Some(reading) = self.read_plate(&frame, candidate).await else {
                continue;
            };
            let decision = self.decide(reading, frame.captured_at).await;
            if let Some(decision) = decision {
                self.save_snapshot(&frame, &candidates, &decision).await;
                return Some(decision);
            }
        }
        None
    }

    async fn detect(&self, frame: &Arc<Frame>) -> Result<Vec<Candidate>> {
        let detector = Arc::clone(&self.deps.detector);
        let frame = Arc::clone(frame);
        tokio::task::spawn_blocking(move || detector.find_candidates(&frame))
            .await
            .context("candidate detection worker join failed")
    }

    /// Recognition, confidence floor and validation. Any miss is a silent skip.
    async fn read_plate(&mut self, frame: &Frame, candidate: &Candidate) -> Option<PlateReading> {
        let recognizer = &self.deps.recognizer;
        let reading = match tokio::time::timeout(
            self.policy.recognition_timeout,
            recognizer.recognize(frame, candidate),
        )
        .await
        {
            Ok(reading) => reading?,
            Err(_) => {
                lane_warn!(
                    &self.lane,
                    "{} recognition timed out after {:?}",
                    recognizer.name(),
                    self.policy.recognition_timeout
                );
                return None;
            }
        };

        if reading.confidence < self.policy.min_confidence {
            lane_debug!(
                &self.lane,
                "discarding {} at confidence {:.2}",
                reading.text,
                reading.confidence
            );
            return None;
        }
        self.state.set_stage(LaneStage::Recognized);

        if !self.deps.validator.is_valid(&reading.text) {
            lane_debug!(&self.lane, "rejected {} by plate grammar", reading.text);
            return None;
        }
        self.state.set_stage(LaneStage::Validated);
        Some(reading)
    }

    /// Dedup, authorization and actuation for a validated reading. `None` when
    /// the reading was suppressed as a repeat.
    async fn decide(&mut self, reading: PlateReading, at: DateTime<Utc>) -> Option<Decision> {
        if self.deps.dedup.should_suppress(&reading.text, &reading.bbox, at) {
            lane_debug!(&self.lane, "{} suppressed within cooldown", reading.text);
            self.state.set_stage(LaneStage::Deduplicated);
            return None;
        }

        let outcome = self
            .deps
            .store
            .authorize(&reading.text, &self.lane, self.role, at)
            .await;
        self.state.set_stage(LaneStage::AuthorizationChecked);
        self.act(&reading, &outcome, at).await;

        self.state.record_trigger(&reading.text, at);
        let decision = Decision {
            lane: self.lane.clone(),
            plate: reading.text,
            confidence: reading.confidence,
            recognizer: reading.source,
            outcome,
            decided_at: at,
        };
        self.deps.decisions.push(decision.clone());
        Some(decision)
    }

    async fn act(&mut self, reading: &PlateReading, outcome: &Outcome, at: DateTime<Utc>) {
        let actuator = &self.deps.actuator;
        match outcome {
            Outcome::Admitted {
                direction,
                session_id,
            } => {
                self.state.set_stage(LaneStage::Admitted);
                lane_info!(
                    &self.lane,
                    "ADMIT {} ({}) session {session_id} at {} via {} conf {:.2}",
                    reading.text,
                    direction.as_str(),
                    at.to_rfc3339(),
                    reading.source,
                    reading.confidence
                );
                if let Err(err) = actuator.open(&self.lane, &reading.text).await {
                    lane_error!(&self.lane, "barrier open failed: {err:?}");
                }
                if let Err(err) = actuator.signal(&self.lane, SignalOutcome::Authorized).await {
                    lane_error!(&self.lane, "signal failed: {err:?}");
                }
                self.deps.dedup.record(&reading.text, &reading.bbox, at);
            }
            Outcome::Denied { reason } => {
                self.state.set_stage(LaneStage::Denied);
                lane_info!(
                    &self.lane,
                    "DENY {} at {}: {reason}",
                    reading.text,
                    at.to_rfc3339()
                );
                let cue = match reason {
                    DenialReason::SessionState(_) => SignalOutcome::SessionError,
                    _ => SignalOutcome::Denied,
                };
                if let Err(err) = actuator.signal(&self.lane, cue).await {
                    lane_error!(&self.lane, "signal failed: {err:?}");
                }
            }
        }
    }

    async fn save_snapshot(&self, frame: &Arc<Frame>, candidates: &[Candidate], decision: &Decision) {
        let Some(dir) = self.policy.snapshot_dir.clone() else {
            return;
        };
        let frame = Arc::clone(frame);
        let candidates = candidates.to_vec();
        let name = format!(
            "{}_{}_{}.jpg",
            decision.lane,
            decision.decided_at.format("%Y%m%dT%H%M%S%.3f"),
            decision.plate
        );

        let saved = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
            let mut canvas = frame.image.to_rgb8();
            draw_candidates(&mut canvas, &candidates);
            let path = dir.join(name);
            canvas
                .save(&path)
                .with_context(|| format!("failed to write snapshot {}", path.display()))?;
            Ok(path)
        })
        .await;

        match saved {
            Ok(Ok(path)) => lane_debug!(&self.lane, "snapshot saved to {}", path.display()),
            Ok(Err(err)) => lane_warn!(&self.lane, "snapshot skipped: {err:?}"),
            Err(err) => lane_warn!(&self.lane, "snapshot worker failed: {err}"),
        }
    }
}
