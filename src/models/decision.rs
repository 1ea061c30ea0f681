use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::LaneId;

/// Whether a passage opens or closes a parking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Entry,
    Exit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Entry => "entry",
            Direction::Exit => "exit",
        }
    }
}

/// Why a plate was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DenialReason {
    NotRegistered,
    OutsideValidityWindow,
    /// Open/close rejected because the session table disagrees with the passage.
    SessionState(String),
    /// Registry could not be consulted; the lane fails closed.
    StoreUnavailable(String),
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::NotRegistered => f.write_str("vehicle not registered"),
            DenialReason::OutsideValidityWindow => f.write_str("authorization outside validity window"),
            DenialReason::SessionState(detail) => write!(f, "session state error: {detail}"),
            DenialReason::StoreUnavailable(detail) => write!(f, "authorization store unavailable: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Outcome {
    Admitted {
        direction: Direction,
        session_id: String,
    },
    Denied {
        reason: DenialReason,
    },
}

impl Outcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Outcome::Admitted { .. })
    }
}

/// Terminal result of one detection cycle on one lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub lane: LaneId,
    pub plate: String,
    pub confidence: f32,
    pub recognizer: &'static str,
    pub outcome: Outcome,
    pub decided_at: DateTime<Utc>,
}
