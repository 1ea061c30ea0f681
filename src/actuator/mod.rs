//! Barrier, indicator and buzzer control with one cancellable auto-close
//! task per lane.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle, time};

use crate::models::LaneId;

pub mod backend;

pub use backend::{ActuatorBackend, ActuatorEvent, BarrierStatus, Indicator, SimulatedBackend};

const ENABLE_LOGS: bool = true;

use crate::{lane_error, lane_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalOutcome {
    Authorized,
    Denied,
    SessionError,
}

#[derive(Debug, Clone, Copy)]
pub struct ActuatorTiming {
    pub hold: Duration,
    pub authorized_tone: Duration,
    pub denied_tone: Duration,
    pub session_error_tone: Duration,
}

impl Default for ActuatorTiming {
    fn default() -> Self {
        Self {
            hold: Duration::from_secs(15),
            authorized_tone: Duration::from_secs(2),
            denied_tone: Duration::from_secs(1),
            session_error_tone: Duration::from_millis(500),
        }
    }
}

struct LaneSlot {
    status: BarrierStatus,
    opened_for: Option<String>,
    auto_close: Option<JoinHandle<()>>,
    /// Bumped on every open/close so a stale timer can tell it was superseded.
    generation: u64,
    buzzer: Option<JoinHandle<()>>,
}

struct LaneActuator {
    lane: LaneId,
    slot: Mutex<LaneSlot>,
}

#[derive(Clone)]
pub struct ActuatorController {
    backend: Arc<dyn ActuatorBackend>,
    timing: ActuatorTiming,
    lanes: Arc<HashMap<LaneId, Arc<LaneActuator>>>,
}

impl ActuatorController {
    pub fn new<I>(backend: Arc<dyn ActuatorBackend>, timing: ActuatorTiming, lanes: I) -> Self
    where
        I: IntoIterator<Item = LaneId>,
    {
        let lanes = lanes
            .into_iter()
            .map(|lane| {
                let actuator = Arc::new(LaneActuator {
                    lane: lane.clone(),
                    slot: Mutex::new(LaneSlot {
                        status: BarrierStatus::Closed,
                        opened_for: None,
                        auto_close: None,
                        generation: 0,
                        buzzer: None,
                    }),
                });
                (lane, actuator)
            })
            .collect();

        Self {
            backend,
            timing,
            lanes: Arc::new(lanes),
        }
    }

    fn lane(&self, lane: &LaneId) -> Result<&Arc<LaneActuator>> {
        self.lanes
            .get(lane)
            .ok_or_else(|| anyhow!("no actuator configured for lane {lane}"))
    }

    pub async fn barrier_status(&self, lane: &LaneId) -> Option<BarrierStatus> {
        let actuator = self.lanes.get(lane)?;
        Some(actuator.slot.lock().await.status)
    }

    /// Plate (or override reason) the barrier is currently held open for.
    pub async fn opened_for(&self, lane: &LaneId) -> Option<String> {
        let actuator = self.lanes.get(lane)?;
        actuator.slot.lock().await.opened_for.clone()
    }

    /// Opens the barrier and (re)arms auto-close after the hold duration. A
    /// pending auto-close from an earlier open is cancelled first.
    pub async fn open(&self, lane: &LaneId, plate: &str) -> Result<()> {
        let actuator = self.lane(lane)?;
        let mut slot = actuator.slot.lock().await;

        if let Some(handle) = slot.auto_close.take() {
            handle.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;

        if slot.status == BarrierStatus::Closed {
            self.drive(lane, |b| b.set_barrier(lane, BarrierStatus::Open));
        }
        self.drive(lane, |b| b.set_indicator(lane, Indicator::Go));
        slot.status = BarrierStatus::Open;
        slot.opened_for = Some(plate.to_string());
        lane_info!(lane, "barrier open for {plate}, auto-close in {:?}", self.timing.hold);

        let controller = self.clone();
        let actuator_ref = Arc::clone(actuator);
        let hold = self.timing.hold;
        slot.auto_close = Some(tokio::spawn(async move {
            time::sleep(hold).await;
            let mut slot = actuator_ref.slot.lock().await;
            if slot.generation != generation {
                return;
            }
            slot.auto_close = None;
            controller.close_locked(&actuator_ref.lane, &mut slot, "hold elapsed");
        }));

        Ok(())
    }

    /// Idempotent: closing a closed barrier drives nothing.
    pub async fn close(&self, lane: &LaneId) -> Result<()> {
        let actuator = self.lane(lane)?;
        let mut slot = actuator.slot.lock().await;
        if let Some(handle) = slot.auto_close.take() {
            handle.abort();
        }
        slot.generation += 1;
        self.close_locked(lane, &mut slot, "close requested");
        Ok(())
    }

    fn close_locked(&self, lane: &LaneId, slot: &mut LaneSlot, cause: &str) {
        if slot.status == BarrierStatus::Closed {
            return;
        }
        self.drive(lane, |b| b.set_barrier(lane, BarrierStatus::Closed));
        self.drive(lane, |b| b.set_indicator(lane, Indicator::Stop));
        slot.status = BarrierStatus::Closed;
        slot.opened_for = None;
        lane_info!(lane, "barrier closed ({cause})");
    }

    /// Sounds the cue for `outcome` and returns immediately; the buzzer is
    /// switched off by a scheduled task.
    pub async fn signal(&self, lane: &LaneId, outcome: SignalOutcome) -> Result<()> {
        let actuator = self.lane(lane)?;
        let tone = match outcome {
            SignalOutcome::Authorized => self.timing.authorized_tone,
            SignalOutcome::Denied => self.timing.denied_tone,
            SignalOutcome::SessionError => self.timing.session_error_tone,
        };

        let mut slot = actuator.slot.lock().await;
        if let Some(handle) = slot.buzzer.take() {
            handle.abort();
        }
        self.drive(lane, |b| b.set_buzzer(lane, true));

        let controller = self.clone();
        let lane_id = lane.clone();
        slot.buzzer = Some(tokio::spawn(async move {
            time::sleep(tone).await;
            controller.drive(&lane_id, |b| b.set_buzzer(&lane_id, false));
        }));
        Ok(())
    }

    /// Cancels every pending timer and forces all barriers closed.
    pub async fn close_all(&self) {
        for (lane, actuator) in self.lanes.iter() {
            let mut slot = actuator.slot.lock().await;
            if let Some(handle) = slot.auto_close.take() {
                handle.abort();
            }
            if let Some(handle) = slot.buzzer.take() {
                handle.abort();
                self.drive(lane, |b| b.set_buzzer(lane, false));
            }
            slot.generation += 1;
            self.close_locked(lane, &mut slot, "shutdown");
        }
    }

    /// Output failures are logged; lane state still follows the command so a
    /// later close is not skipped.
    fn drive<F>(&self, lane: &LaneId, action: F)
    where
        F: FnOnce(&dyn ActuatorBackend) -> Result<()>,
    {
        if let Err(err) = action(self.backend.as_ref()) {
            lane_error!(lane, "actuator output failed: {err:?}");
        }
    }
}
