use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

use anyhow::Result;
use log::info;
use serde::Serialize;

use crate::models::LaneId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BarrierStatus {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Indicator {
    Go,
    Stop,
}

/// Physical outputs of one lane. Implementations must be cheap and
/// non-blocking; timing lives in the controller.
pub trait ActuatorBackend: Send + Sync {
    fn set_barrier(&self, lane: &LaneId, status: BarrierStatus) -> Result<()>;

    fn set_indicator(&self, lane: &LaneId, indicator: Indicator) -> Result<()>;

    fn set_buzzer(&self, lane: &LaneId, on: bool) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorEvent {
    Barrier { lane: LaneId, status: BarrierStatus },
    Indicator { lane: LaneId, indicator: Indicator },
    Buzzer { lane: LaneId, on: bool },
}

/// Output changes kept by [`SimulatedBackend`] before the oldest are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Backend for machines without GPIO. Logs every output change and keeps the
/// most recent ones for inspection.
#[derive(Debug)]
pub struct SimulatedBackend {
    events: Mutex<VecDeque<ActuatorEvent>>,
    capacity: usize,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY))),
            capacity,
        }
    }

    fn log(&self) -> MutexGuard<'_, VecDeque<ActuatorEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, event: ActuatorEvent) {
        let mut log = self.log();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(event);
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<ActuatorEvent> {
        self.log().iter().cloned().collect()
    }

    /// Number of barrier movements to `status` on `lane`.
    pub fn barrier_moves(&self, lane: &LaneId, status: BarrierStatus) -> usize {
        self.log()
            .iter()
            .filter(|e| matches!(e, ActuatorEvent::Barrier { lane: l, status: s } if l == lane && *s == status))
            .count()
    }

    /// Number of times the buzzer was switched on for `lane`.
    pub fn buzzer_activations(&self, lane: &LaneId) -> usize {
        self.log()
            .iter()
            .filter(|e| matches!(e, ActuatorEvent::Buzzer { lane: l, on: true } if l == lane))
            .count()
    }
}

impl ActuatorBackend for SimulatedBackend {
    fn set_barrier(&self, lane: &LaneId, status: BarrierStatus) -> Result<()> {
        info!("[sim] lane {lane} barrier -> {status:?}");
        self.record(ActuatorEvent::Barrier {
            lane: lane.clone(),
            status,
        });
        Ok(())
    }

    fn set_indicator(&self, lane: &LaneId, indicator: Indicator) -> Result<()> {
        info!("[sim] lane {lane} indicator -> {indicator:?}");
        self.record(ActuatorEvent::Indicator {
            lane: lane.clone(),
            indicator,
        });
        Ok(())
    }

    fn set_buzzer(&self, lane: &LaneId, on: bool) -> Result<()> {
        self.record(ActuatorEvent::Buzzer {
            lane: lane.clone(),
            on,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_keeps_only_the_newest_changes() {
        let backend = SimulatedBackend::with_capacity(3);
        let lane = LaneId::from("entry");
        for _ in 0..10 {
            backend.set_barrier(&lane, BarrierStatus::Open).expect("open");
            backend.set_barrier(&lane, BarrierStatus::Closed).expect("close");
        }
        backend.set_buzzer(&lane, true).expect("buzz");

        let events = backend.events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.last(),
            Some(&ActuatorEvent::Buzzer {
                lane: lane.clone(),
                on: true
            })
        );
        assert_eq!(backend.barrier_moves(&lane, BarrierStatus::Closed), 1);
        assert_eq!(backend.buzzer_activations(&lane), 1);
    }
}
