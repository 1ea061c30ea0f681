//! Parking session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Open,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        }
    }
}

/// One physical presence interval. `exit_time`, `exit_lane` and
/// `duration_ms` are set together when the session closes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParkingSession {
    pub id: String,
    pub plate: String,
    pub entry_lane: String,
    pub exit_lane: Option<String>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParkingSession {
    pub fn opened(plate: &str, lane: &str, entry_time: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plate: plate.to_string(),
            entry_lane: lane.to_string(),
            exit_lane: None,
            entry_time,
            exit_time: None,
            duration_ms: None,
            status: SessionStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    /// Exit minus entry, once closed.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.exit_time.map(|exit| exit - self.entry_time)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: u64,
    pub open_sessions: u64,
    pub closed_sessions: u64,
    pub registered_vehicles: u64,
}
