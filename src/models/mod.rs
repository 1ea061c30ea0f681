//! Data carried through the plate-to-decision pipeline.

pub mod decision;
pub mod frame;
pub mod plate;

pub use decision::{Decision, DenialReason, Direction, Outcome};
pub use frame::{Frame, LaneId, LaneRole};
pub use plate::{BoundingBox, Candidate, CandidateBounds, PlateReading, RegionMetrics};
