mod connection;
pub mod guard;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use guard::QueryRejected;
pub use models::{ParkingSession, SessionStats, SessionStatus, VehicleRecord};
pub use repositories::sessions::OpenOutcome;
