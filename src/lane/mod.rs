//! Per-lane control loop and the controller that runs lanes side by side.

pub mod controller;
pub mod decisions;
pub mod orchestrator;
pub mod state;

pub use controller::{GateController, LaneReport, LaneSpec};
pub use decisions::DecisionLog;
pub use orchestrator::{LaneExit, LaneOrchestrator, LanePolicy, PipelineDeps};
pub use state::{LaneSnapshot, LaneStage};
