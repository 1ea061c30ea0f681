use std::{sync::Arc, time::Duration};

use chrono::Utc;
use image::{DynamicImage, GrayImage, Luma};
use tokio_util::sync::CancellationToken;

use plategate_lib::{
    actuator::{ActuatorBackend, ActuatorController, ActuatorTiming, BarrierStatus, SimulatedBackend},
    authorization::AuthorizationStore,
    db::{Database, SessionStatus, VehicleRecord},
    dedup::{DedupCache, DedupConfig},
    lane::{DecisionLog, GateController, LaneExit, LaneOrchestrator, LanePolicy, LaneSpec, LaneStage, PipelineDeps},
    models::{DenialReason, Direction, Frame, LaneId, LaneRole, Outcome},
    recognition::{PlateValidator, TestStubRecognizer, ValidationConfig},
    sensing::{CandidateDetector, DetectorConfig, MemorySource},
};

/// Dark scene with one bright plate-shaped block.
fn plate_scene() -> DynamicImage {
    let mut img = GrayImage::from_pixel(640, 480, Luma([35]));
    for y in 200..270 {
        for x in 200..440 {
            img.put_pixel(x, y, Luma([230]));
        }
    }
    DynamicImage::ImageLuma8(img)
}

struct Harness {
    backend: Arc<SimulatedBackend>,
    deps: PipelineDeps,
}

async fn harness(recognized: &str, lanes: &[LaneId]) -> Harness {
    let db = Database::in_memory().expect("db");
    db.upsert_vehicle(&VehicleRecord::new("KA01AB1234"))
        .await
        .expect("seed registry");

    let backend = Arc::new(SimulatedBackend::new());
    let outputs: Arc<dyn ActuatorBackend> = backend.clone();
    let deps = PipelineDeps {
        detector: Arc::new(CandidateDetector::new(DetectorConfig::default())),
        recognizer: Arc::new(TestStubRecognizer::with_plates([recognized])),
        validator: Arc::new(PlateValidator::new(&ValidationConfig::default()).expect("validator")),
        dedup: Arc::new(DedupCache::new(Duration::from_secs(10), &DedupConfig::default())),
        store: AuthorizationStore::new(db),
        actuator: ActuatorController::new(outputs, ActuatorTiming::default(), lanes.iter().cloned()),
        decisions: Arc::new(DecisionLog::new(50)),
    };
    Harness { backend, deps }
}

fn policy() -> LanePolicy {
    LanePolicy {
        sample_every: 1,
        min_interval: chrono::Duration::seconds(2),
        recognition_timeout: Duration::from_secs(2),
        min_confidence: 0.4,
        max_source_retries: 3,
        retry_base: Duration::from_millis(10),
        snapshot_dir: None,
    }
}

#[tokio::test]
async fn registered_plate_is_admitted_then_deduplicated() {
    let lane = LaneId::from("entry");
    let Harness { backend, deps } = harness("KA01AB1234", &[lane.clone()]).await;

    let t0 = Utc::now();
    let mut source = MemorySource::new(lane.clone());
    source.push_frame(plate_scene(), t0);
    source.push_frame(plate_scene(), t0 + chrono::Duration::seconds(3));

    let mut controller = GateController::start(
        vec![LaneSpec {
            lane: lane.clone(),
            role: LaneRole::Entry,
            source: Box::new(source),
        }],
        deps.clone(),
        policy(),
    );
    let report = controller.next_lane_exit().await.expect("lane report");
    assert_eq!(report.result.expect("clean exit"), LaneExit::EndOfStream);

    let decisions = controller.recent_decisions(10);
    assert_eq!(decisions.len(), 1, "repeat sighting must not produce a decision");
    match &decisions[0].outcome {
        Outcome::Admitted { direction, .. } => assert_eq!(*direction, Direction::Entry),
        other => panic!("expected admission, got {other:?}"),
    }
    assert_eq!(decisions[0].plate, "KA01AB1234");
    assert_eq!(decisions[0].recognizer, "test_stub");

    let open = controller.open_sessions().await.expect("open sessions");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].plate, "KA01AB1234");
    assert_eq!(open[0].status, SessionStatus::Open);

    assert_eq!(backend.barrier_moves(&lane, BarrierStatus::Open), 1);
    let snapshot = controller.lane_snapshot(&lane).await.expect("snapshot");
    assert_eq!(snapshot.barrier, BarrierStatus::Open);
    assert_eq!(snapshot.last_plate.as_deref(), Some("KA01AB1234"));
    assert_eq!(snapshot.frames_processed, 2);

    controller.shutdown().await;
    assert_eq!(backend.barrier_moves(&lane, BarrierStatus::Closed), 1);
}

#[tokio::test]
async fn repeat_within_cooldown_stops_at_dedup() {
    let lane = LaneId::from("entry");
    let Harness { backend, deps } = harness("KA01AB1234", &[lane.clone()]).await;
    let (mut orchestrator, snapshots) = LaneOrchestrator::new(
        lane.clone(),
        LaneRole::Entry,
        Box::new(MemorySource::new(lane.clone())),
        deps.clone(),
        policy(),
    );

    let t0 = Utc::now();
    let first = orchestrator
        .process_frame(Frame::new(lane.clone(), 1, t0, plate_scene()))
        .await
        .expect("first sighting decides");
    assert!(first.outcome.is_admitted());
    assert_eq!(snapshots.borrow().stage, LaneStage::Admitted);

    let repeat = orchestrator
        .process_frame(Frame::new(lane.clone(), 2, t0 + chrono::Duration::seconds(3), plate_scene()))
        .await;
    assert!(repeat.is_none());
    assert_eq!(snapshots.borrow().stage, LaneStage::Deduplicated);

    let stats = deps.store.database().session_stats().await.expect("stats");
    assert_eq!(stats.total_sessions, 1);
    assert_eq!(stats.open_sessions, 1);
    assert_eq!(backend.barrier_moves(&lane, BarrierStatus::Open), 1);
    assert_eq!(backend.buzzer_activations(&lane), 1);
}

#[tokio::test]
async fn unregistered_plate_is_denied_without_session() {
    let lane = LaneId::from("gate");
    let Harness { backend, deps } = harness("XX99ZZ0000", &[lane.clone()]).await;

    let mut source = MemorySource::new(lane.clone());
    source.push_frame(plate_scene(), Utc::now());
    let (orchestrator, snapshots) =
        LaneOrchestrator::new(lane.clone(), LaneRole::Gate, Box::new(source), deps.clone(), policy());
    let exit = orchestrator.run(CancellationToken::new()).await.expect("run");
    assert_eq!(exit, LaneExit::EndOfStream);

    let decisions = deps.decisions.recent(5);
    assert_eq!(decisions.len(), 1);
    assert_eq!(
        decisions[0].outcome,
        Outcome::Denied {
            reason: DenialReason::NotRegistered
        }
    );
    assert_eq!(snapshots.borrow().last_plate.as_deref(), Some("XX99ZZ0000"));

    assert_eq!(backend.buzzer_activations(&lane), 1);
    assert_eq!(backend.barrier_moves(&lane, BarrierStatus::Open), 0);
    assert_eq!(
        deps.actuator.barrier_status(&lane).await,
        Some(BarrierStatus::Closed)
    );
    let stats = deps.store.database().session_stats().await.expect("stats");
    assert_eq!(stats.total_sessions, 0);
}

#[tokio::test]
async fn entry_then_exit_closes_the_session() {
    let entry = LaneId::from("entry");
    let exit = LaneId::from("exit");
    let Harness { backend, deps } = harness("KA01AB1234", &[entry.clone(), exit.clone()]).await;

    let t0 = Utc::now();
    let (mut entry_lane, _) = LaneOrchestrator::new(
        entry.clone(),
        LaneRole::Entry,
        Box::new(MemorySource::new(entry.clone())),
        deps.clone(),
        policy(),
    );
    let (mut exit_lane, _) = LaneOrchestrator::new(
        exit.clone(),
        LaneRole::Exit,
        Box::new(MemorySource::new(exit.clone())),
        deps.clone(),
        policy(),
    );

    entry_lane
        .process_frame(Frame::new(entry.clone(), 1, t0, plate_scene()))
        .await
        .expect("entry decision");
    let left = exit_lane
        .process_frame(Frame::new(exit.clone(), 1, t0 + chrono::Duration::minutes(45), plate_scene()))
        .await
        .expect("exit decision");
    match left.outcome {
        Outcome::Admitted { direction, .. } => assert_eq!(direction, Direction::Exit),
        other => panic!("expected exit admission, got {other:?}"),
    }

    let history = deps.store.database().list_sessions_paginated(10, 0).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SessionStatus::Closed);
    assert_eq!(history[0].exit_lane.as_deref(), Some("exit"));
    assert_eq!(history[0].duration_ms, Some(45 * 60 * 1000));
    assert_eq!(backend.barrier_moves(&exit, BarrierStatus::Open), 1);
}
