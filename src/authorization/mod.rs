//! Vehicle registry lookups and the entry/exit session lifecycle.
//!
//! Any failure to reach the backing store is reported as
//! [`StoreError::Unavailable`] and turned into a denial by [`AuthorizationStore::authorize`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::{Database, OpenOutcome, ParkingSession, VehicleRecord};
use crate::models::{DenialReason, Direction, LaneId, LaneRole, Outcome};

const ENABLE_LOGS: bool = true;

use crate::{lane_error, lane_info, lane_warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("plate {plate} already has open session {session_id}")]
    Conflict { plate: String, session_id: String },
    #[error("plate {plate} has no open session")]
    NotFound { plate: String },
    #[error("authorization store unavailable: {0}")]
    Unavailable(String),
}

fn unavailable(err: anyhow::Error) -> StoreError {
    StoreError::Unavailable(format!("{err:#}"))
}

#[derive(Clone)]
pub struct AuthorizationStore {
    db: Database,
}

impl AuthorizationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// `None` means the plate is not authorized.
    pub async fn lookup(&self, plate: &str) -> Result<Option<VehicleRecord>, StoreError> {
        self.db.find_vehicle(plate).await.map_err(unavailable)
    }

    pub async fn has_open_session(&self, plate: &str) -> Result<bool, StoreError> {
        self.db
            .find_open_session(plate)
            .await
            .map(|session| session.is_some())
            .map_err(unavailable)
    }

    pub async fn open_session(
        &self,
        plate: &str,
        lane: &LaneId,
        time: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        match self
            .db
            .open_parking_session(plate, lane.as_str(), time)
            .await
            .map_err(unavailable)?
        {
            OpenOutcome::Opened(session) => Ok(session.id),
            OpenOutcome::AlreadyOpen(session_id) => Err(StoreError::Conflict {
                plate: plate.to_string(),
                session_id,
            }),
        }
    }

    pub async fn close_session(
        &self,
        plate: &str,
        lane: &LaneId,
        time: DateTime<Utc>,
    ) -> Result<ParkingSession, StoreError> {
        self.db
            .close_parking_session(plate, lane.as_str(), time)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| StoreError::NotFound {
                plate: plate.to_string(),
            })
    }

    /// Full authorization step for a validated, non-duplicate plate.
    ///
    /// Direction comes from session state, not from the lane: no open session
    /// means entry, an open session means exit. A mismatch with the lane's
    /// installed role is logged but does not change the outcome.
    pub async fn authorize(
        &self,
        plate: &str,
        lane: &LaneId,
        role: LaneRole,
        at: DateTime<Utc>,
    ) -> Outcome {
        let vehicle = match self.lookup(plate).await {
            Ok(Some(vehicle)) => vehicle,
            Ok(None) => {
                return Outcome::Denied {
                    reason: DenialReason::NotRegistered,
                }
            }
            Err(err) => return self.fail_closed(lane, plate, err),
        };

        if !vehicle.is_valid_at(at) {
            return Outcome::Denied {
                reason: DenialReason::OutsideValidityWindow,
            };
        }

        let direction = match self.has_open_session(plate).await {
            Ok(true) => Direction::Exit,
            Ok(false) => Direction::Entry,
            Err(err) => return self.fail_closed(lane, plate, err),
        };

        let expected = match role {
            LaneRole::Entry => Some(Direction::Entry),
            LaneRole::Exit => Some(Direction::Exit),
            LaneRole::Gate => None,
        };
        if expected.is_some_and(|d| d != direction) {
            lane_warn!(
                lane,
                "{plate} treated as {} on a lane installed for {:?} traffic",
                direction.as_str(),
                role
            );
        }

        let result = match direction {
            Direction::Entry => self.open_session(plate, lane, at).await,
            Direction::Exit => self.close_session(plate, lane, at).await.map(|session| {
                lane_info!(
                    lane,
                    "{plate} session {} closed after {}s",
                    session.id,
                    session.duration().map_or(0, |d| d.num_seconds())
                );
                session.id
            }),
        };

        match result {
            Ok(session_id) => Outcome::Admitted {
                direction,
                session_id,
            },
            Err(err @ (StoreError::Conflict { .. } | StoreError::NotFound { .. })) => {
                lane_warn!(lane, "session state error for {plate}: {err}; needs operator reconciliation");
                Outcome::Denied {
                    reason: DenialReason::SessionState(err.to_string()),
                }
            }
            Err(err) => self.fail_closed(lane, plate, err),
        }
    }

    fn fail_closed(&self, lane: &LaneId, plate: &str, err: StoreError) -> Outcome {
        lane_error!(lane, "denying {plate}: {err}");
        Outcome::Denied {
            reason: DenialReason::StoreUnavailable(err.to_string()),
        }
    }
}
