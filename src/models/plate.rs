use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Grows the box by `padding` on every side, clamped to `max_width` x `max_height`.
    pub fn padded(&self, padding: u32, max_width: u32, max_height: u32) -> Self {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let right = (self.x + self.width + padding).min(max_width);
        let bottom = (self.y + self.height + padding).min(max_height);
        Self {
            x,
            y,
            width: right.saturating_sub(x),
            height: bottom.saturating_sub(y),
        }
    }

    /// True when both top-left corners lie within `tolerance` pixels on each axis.
    pub fn is_near(&self, other: &BoundingBox, tolerance: u32) -> bool {
        self.x.abs_diff(other.x) < tolerance && self.y.abs_diff(other.y) < tolerance
    }
}

/// Raw geometry measured for one external contour before filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionMetrics {
    pub bbox: BoundingBox,
    pub area: f64,
    pub hull_area: f64,
}

/// A frame region that passed every geometric filter and is worth recognising.
///
/// Only [`crate::sensing::CandidateDetector`] builds these, through
/// [`Candidate::accept`], so a `Candidate` always satisfies the configured bounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    bbox: BoundingBox,
    area: f64,
    aspect_ratio: f64,
    solidity: f64,
    extent: f64,
}

/// Acceptance bounds applied to [`RegionMetrics`].
#[derive(Debug, Clone, Copy)]
pub struct CandidateBounds {
    pub min_area: f64,
    pub max_area: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub min_solidity: f64,
    pub min_extent: f64,
}

impl Candidate {
    pub fn accept(metrics: RegionMetrics, bounds: &CandidateBounds) -> Option<Self> {
        let bbox = metrics.bbox;
        if bbox.width == 0 || bbox.height == 0 {
            return None;
        }
        if metrics.area < bounds.min_area || metrics.area > bounds.max_area {
            return None;
        }

        let aspect_ratio = f64::from(bbox.width) / f64::from(bbox.height);
        if aspect_ratio < bounds.min_aspect_ratio || aspect_ratio > bounds.max_aspect_ratio {
            return None;
        }

        let solidity = if metrics.hull_area > 0.0 {
            (metrics.area / metrics.hull_area).min(1.0)
        } else {
            0.0
        };
        if solidity <= bounds.min_solidity {
            return None;
        }

        let extent = metrics.area / bbox.area() as f64;
        if extent <= bounds.min_extent {
            return None;
        }

        Some(Self {
            bbox,
            area: metrics.area,
            aspect_ratio,
            solidity,
            extent,
        })
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn area(&self) -> f64 {
        self.area
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.aspect_ratio
    }

    pub fn solidity(&self) -> f64 {
        self.solidity
    }

    pub fn extent(&self) -> f64 {
        self.extent
    }

    /// Composite ranking used to order candidates within a frame.
    pub fn quality(&self) -> f64 {
        self.area * self.solidity * self.extent
    }
}

/// Text produced by a recognition backend for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateReading {
    /// Uppercase A-Z/0-9 only.
    pub text: String,
    /// Always within [0, 1].
    pub confidence: f32,
    pub source: &'static str,
    pub bbox: BoundingBox,
    pub read_at: DateTime<Utc>,
}

impl PlateReading {
    pub fn new(
        text: String,
        confidence: f32,
        source: &'static str,
        bbox: BoundingBox,
        read_at: DateTime<Utc>,
    ) -> Self {
        Self {
            text,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            bbox,
            read_at,
        }
    }
}
