use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::actuator::BarrierStatus;
use crate::models::{LaneId, LaneRole};

/// Where the current detection cycle got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LaneStage {
    Idle,
    CandidateFound,
    Recognized,
    Validated,
    Deduplicated,
    AuthorizationChecked,
    Admitted,
    Denied,
    /// Frame source failed beyond the retry limit.
    Degraded,
    Stopped,
}

/// Read-only view published to the administrative interface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneSnapshot {
    pub lane: LaneId,
    pub role: LaneRole,
    pub source: String,
    pub stage: LaneStage,
    /// Filled from the actuator when the snapshot is read.
    pub barrier: BarrierStatus,
    pub last_trigger_at: Option<DateTime<Utc>>,
    pub last_plate: Option<String>,
    pub frames_seen: u64,
    pub frames_processed: u64,
    pub consecutive_source_errors: u32,
    pub degraded: bool,
}

/// Mutable lane state. Owned by one orchestrator; every change is pushed to
/// a watch channel so readers never lock the lane.
pub struct LaneState {
    current: LaneSnapshot,
    publisher: watch::Sender<LaneSnapshot>,
}

impl LaneState {
    pub fn new(lane: LaneId, role: LaneRole, source: String) -> (Self, watch::Receiver<LaneSnapshot>) {
        let current = LaneSnapshot {
            lane,
            role,
            source,
            stage: LaneStage::Idle,
            barrier: BarrierStatus::Closed,
            last_trigger_at: None,
            last_plate: None,
            frames_seen: 0,
            frames_processed: 0,
            consecutive_source_errors: 0,
            degraded: false,
        };
        let (publisher, receiver) = watch::channel(current.clone());
        (Self { current, publisher }, receiver)
    }

    pub fn snapshot(&self) -> &LaneSnapshot {
        &self.current
    }

    fn publish(&self) {
        // No receivers left only happens during shutdown.
        let _ = self.publisher.send(self.current.clone());
    }

    pub fn set_stage(&mut self, stage: LaneStage) {
        if self.current.stage != stage {
            self.current.stage = stage;
            self.publish();
        }
    }

    /// Counts the frame and returns its 1-based position in the stream.
    pub fn frame_seen(&mut self) -> u64 {
        self.current.frames_seen += 1;
        self.current.frames_seen
    }

    pub fn frame_processed(&mut self) {
        self.current.frames_processed += 1;
        self.publish();
    }

    pub fn record_trigger(&mut self, plate: &str, at: DateTime<Utc>) {
        self.current.last_plate = Some(plate.to_string());
        self.current.last_trigger_at = Some(at);
        self.publish();
    }

    pub fn source_failed(&mut self) -> u32 {
        self.current.consecutive_source_errors += 1;
        self.publish();
        self.current.consecutive_source_errors
    }

    pub fn source_recovered(&mut self) {
        if self.current.consecutive_source_errors != 0 {
            self.current.consecutive_source_errors = 0;
            self.publish();
        }
    }

    pub fn mark_degraded(&mut self) {
        self.current.degraded = true;
        self.current.stage = LaneStage::Degraded;
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_are_visible_to_readers() {
        let (mut state, receiver) = LaneState::new(LaneId::from("entry"), LaneRole::Entry, "memory".into());
        state.set_stage(LaneStage::CandidateFound);
        state.record_trigger("KA01AB1234", Utc::now());
        assert_eq!(state.source_failed(), 1);

        let seen = receiver.borrow().clone();
        assert_eq!(seen.stage, LaneStage::CandidateFound);
        assert_eq!(seen.last_plate.as_deref(), Some("KA01AB1234"));
        assert_eq!(seen.consecutive_source_errors, 1);

        state.mark_degraded();
        assert!(receiver.borrow().degraded);
    }
}
