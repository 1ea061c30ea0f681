pub mod session;
pub mod vehicle;

pub use session::{ParkingSession, SessionStats, SessionStatus};
pub use vehicle::VehicleRecord;
