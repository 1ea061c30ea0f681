//! Lane-tagged logging macros that check a module-level `ENABLE_LOGS` flag.
//!
//! Usage:
//! ```ignore
//! // In your module, define the flag first:
//! const ENABLE_LOGS: bool = true;
//!
//! // Then use the macros (they're exported at the crate root):
//! use crate::{lane_info, lane_warn};
//!
//! lane_info!(lane_id, "barrier opened for {}", plate);
//! ```
//!
//! Every line is prefixed with `[lane <id>]` so interleaved output from
//! concurrent lanes stays attributable.

/// Conditional info logging for one lane.
#[macro_export]
macro_rules! lane_info {
    ($lane:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!("[lane {}] {}", $lane, format_args!($($arg)*));
        }
    };
}

/// Conditional warn logging for one lane.
#[macro_export]
macro_rules! lane_warn {
    ($lane:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!("[lane {}] {}", $lane, format_args!($($arg)*));
        }
    };
}

/// Conditional error logging for one lane.
#[macro_export]
macro_rules! lane_error {
    ($lane:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!("[lane {}] {}", $lane, format_args!($($arg)*));
        }
    };
}

/// Conditional debug logging for one lane. Used for the expected, noisy
/// outcomes (validation rejects, dedup suppression).
#[macro_export]
macro_rules! lane_debug {
    ($lane:expr, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!("[lane {}] {}", $lane, format_args!($($arg)*));
        }
    };
}
