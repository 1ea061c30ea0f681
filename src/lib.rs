pub mod actuator;
pub mod authorization;
pub mod db;
pub mod dedup;
pub mod lane;
pub mod models;
pub mod recognition;
pub mod sensing;
pub mod settings;
pub mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use actuator::{ActuatorBackend, ActuatorController, SimulatedBackend};
use authorization::AuthorizationStore;
use db::Database;
use dedup::DedupCache;
use lane::{DecisionLog, GateController, LaneExit, LanePolicy, LaneSpec, PipelineDeps};
use recognition::{build_recognizer, PlateValidator};
use sensing::{build_source, CandidateDetector};
use settings::GateSettings;

/// Wires every component from settings and runs until Ctrl-C or until every
/// lane has stopped.
pub async fn run() -> Result<()> {
    let settings = GateSettings::from_env()?;

    // Initialize logging (RUST_LOG still takes precedence per module)
    let level = if settings.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    info!("PlateGate starting up with {} lane(s)...", settings.lanes.len());
    if settings.lanes.is_empty() {
        warn!("no lanes configured; nothing to do");
        return Ok(());
    }

    let database = Database::open(settings.database_path.clone())?;
    info!("database ready at {}", database.location());
    let open = database
        .list_open_sessions()
        .await
        .context("failed to read open sessions at startup")?;
    if !open.is_empty() {
        info!("{} vehicle(s) still inside from a previous run", open.len());
    }

    let recognizer = build_recognizer(&settings.recognizer)?;
    info!("recognition backend: {}", recognizer.name());

    warn!("no GPIO backend configured; using simulated actuators");
    let backend: Arc<dyn ActuatorBackend> = Arc::new(SimulatedBackend::new());
    let actuator = ActuatorController::new(
        backend,
        settings.actuator_timing(),
        settings.lanes.iter().map(|lane| lane.id.clone()),
    );

    let deps = PipelineDeps {
        detector: Arc::new(CandidateDetector::new(settings.detector.clone())),
        recognizer,
        validator: Arc::new(PlateValidator::new(&settings.validation)?),
        dedup: Arc::new(DedupCache::new(settings.dedup_cooldown(), &settings.dedup)),
        store: AuthorizationStore::new(database),
        actuator,
        decisions: Arc::new(DecisionLog::new(settings.decision_history)),
    };

    let mut specs = Vec::with_capacity(settings.lanes.len());
    for lane in &settings.lanes {
        let source = build_source(&lane.id, &lane.source, lane.fallback_source.as_ref())
            .with_context(|| format!("failed to set up frame source for lane {}", lane.id))?;
        specs.push(LaneSpec {
            lane: lane.id.clone(),
            role: lane.role,
            source,
        });
    }

    let mut controller = GateController::start(specs, deps, LanePolicy::from_settings(&settings));
    let mut running = settings.lanes.len();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("failed to listen for Ctrl-C: {err}");
                }
                info!("shutdown requested");
                break;
            }
            report = controller.next_lane_exit() => {
                let Some(report) = report else { break };
                match report.result {
                    Ok(LaneExit::EndOfStream) => info!("lane {} reached end of stream", report.lane),
                    Ok(LaneExit::Stopped) => info!("lane {} stopped", report.lane),
                    Err(err) => warn!("lane {} degraded: {err:?}", report.lane),
                }
                running -= 1;
                if running == 0 {
                    info!("no lanes left running");
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}
