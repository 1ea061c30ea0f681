use std::fmt;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Identifier of one physical lane (camera + barrier pair).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneId(String);

impl LaneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LaneId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What the lane was installed for. Direction of a passage is still decided by
/// session state; the role is only used to flag mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LaneRole {
    Entry,
    Exit,
    Gate,
}

impl Default for LaneRole {
    fn default() -> Self {
        LaneRole::Gate
    }
}

/// A single image sample. Owned by the orchestrator iteration that read it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub lane: LaneId,
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub image: DynamicImage,
}

impl Frame {
    pub fn new(lane: LaneId, sequence: u64, captured_at: DateTime<Utc>, image: DynamicImage) -> Self {
        Self {
            lane,
            sequence,
            captured_at,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
