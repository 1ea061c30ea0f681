use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use log::{info, warn};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{ParkingSession, SessionStats},
    models::{Decision, LaneId, LaneRole},
    sensing::FrameSource,
};

use super::{
    orchestrator::{LaneExit, LaneOrchestrator, LanePolicy, PipelineDeps},
    state::LaneSnapshot,
};

/// Everything needed to start one lane.
pub struct LaneSpec {
    pub lane: LaneId,
    pub role: LaneRole,
    pub source: Box<dyn FrameSource>,
}

/// Sent once when a lane task finishes for any reason.
#[derive(Debug)]
pub struct LaneReport {
    pub lane: LaneId,
    pub result: Result<LaneExit>,
}

struct LaneHandle {
    snapshots: watch::Receiver<LaneSnapshot>,
    task: JoinHandle<()>,
}

/// Owns the running lanes and serves the administrative interface.
pub struct GateController {
    lanes: BTreeMap<LaneId, LaneHandle>,
    deps: PipelineDeps,
    cancel_token: CancellationToken,
    reports: mpsc::UnboundedReceiver<LaneReport>,
}

impl GateController {
    /// Spawns one task per lane. Lanes share nothing but `deps`.
    pub fn start(specs: Vec<LaneSpec>, deps: PipelineDeps, policy: LanePolicy) -> Self {
        let cancel_token = CancellationToken::new();
        let (report_tx, reports) = mpsc::unbounded_channel();
        let mut lanes = BTreeMap::new();

        for spec in specs {
            let (orchestrator, snapshots) = LaneOrchestrator::new(
                spec.lane.clone(),
                spec.role,
                spec.source,
                deps.clone(),
                policy.clone(),
            );
            let token = cancel_token.child_token();
            let report_tx = report_tx.clone();
            let lane = spec.lane.clone();
            let task = tokio::spawn(async move {
                let result = orchestrator.run(token).await;
                let _ = report_tx.send(LaneReport { lane, result });
            });
            lanes.insert(spec.lane, LaneHandle { snapshots, task });
        }

        info!("gate controller started {} lane(s)", lanes.len());
        Self {
            lanes,
            deps,
            cancel_token,
            reports,
        }
    }

    pub fn lane_ids(&self) -> Vec<LaneId> {
        self.lanes.keys().cloned().collect()
    }

    fn handle(&self, lane: &LaneId) -> Result<&LaneHandle> {
        self.lanes
            .get(lane)
            .ok_or_else(|| anyhow!("unknown lane {lane}"))
    }

    pub async fn lane_snapshot(&self, lane: &LaneId) -> Option<LaneSnapshot> {
        let handle = self.lanes.get(lane)?;
        let mut snapshot = handle.snapshots.borrow().clone();
        if let Some(status) = self.deps.actuator.barrier_status(lane).await {
            snapshot.barrier = status;
        }
        Some(snapshot)
    }

    pub async fn snapshots(&self) -> Vec<LaneSnapshot> {
        let mut out = Vec::with_capacity(self.lanes.len());
        for lane in self.lanes.keys() {
            if let Some(snapshot) = self.lane_snapshot(lane).await {
                out.push(snapshot);
            }
        }
        out
    }

    /// Newest first, across all lanes.
    pub fn recent_decisions(&self, limit: usize) -> Vec<Decision> {
        self.deps.decisions.recent(limit)
    }

    pub async fn session_history(&self, limit: u32, offset: u32) -> Result<Vec<ParkingSession>> {
        self.deps
            .store
            .database()
            .list_sessions_paginated(limit, offset)
            .await
    }

    pub async fn open_sessions(&self) -> Result<Vec<ParkingSession>> {
        self.deps.store.database().list_open_sessions().await
    }

    pub async fn stats(&self) -> Result<SessionStats> {
        self.deps.store.database().session_stats().await
    }

    /// Operator override. Goes through the same actuator path as an admitted
    /// plate, so the hold timer and barrier state stay consistent.
    pub async fn force_open(&self, lane: &LaneId, reason: &str) -> Result<()> {
        self.handle(lane)?;
        warn!("[lane {lane}] manual open: {reason}");
        self.deps
            .actuator
            .open(lane, &format!("override: {reason}"))
            .await
    }

    pub async fn force_close(&self, lane: &LaneId) -> Result<()> {
        self.handle(lane)?;
        warn!("[lane {lane}] manual close");
        self.deps.actuator.close(lane).await
    }

    /// Next lane to finish. `None` once every lane has reported.
    pub async fn next_lane_exit(&mut self) -> Option<LaneReport> {
        if self.lanes.is_empty() {
            return None;
        }
        self.reports.recv().await
    }

    /// Stops every lane, waits for them to release their sources and forces
    /// all barriers closed.
    pub async fn shutdown(self) {
        info!("stopping {} lane(s)", self.lanes.len());
        self.cancel_token.cancel();

        for (lane, handle) in self.lanes {
            if let Err(err) = handle.task.await {
                warn!("[lane {lane}] task failed to join: {err}");
            }
        }

        // After the join so no in-flight cycle can reopen a barrier.
        self.deps.actuator.close_all().await;
        info!("all lanes stopped, barriers closed");
    }
}
