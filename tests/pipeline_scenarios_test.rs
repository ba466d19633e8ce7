//! End-to-end scenarios: feed → pipeline → collaborators.

mod common;

use common::{settings, transaction, LinkScript, ScriptedTransport};
use satoshis_grid::collaborator::{CollaboratorCall, RecordingCollaborator};
use satoshis_grid::config::SessionConfig;
use satoshis_grid::feed::FeedSettings;
use satoshis_grid::model::{BlockEvent, FeedMessage, HeightSource, RawEvent, Tier, SATS_PER_COIN};
use satoshis_grid::pipeline::IngestionPipeline;
use satoshis_grid::{CollaboratorSet, FeedConnector, LifecycleCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn recorded_pipeline(session: &SessionConfig) -> (IngestionPipeline, RecordingCollaborator) {
    let recorder = RecordingCollaborator::new();
    let set = CollaboratorSet::new().with(Box::new(recorder.clone()));
    (IngestionPipeline::new(session, set).with_rng_seed(17), recorder)
}

fn height(height: u64, source: HeightSource) -> FeedMessage {
    FeedMessage::Height { height, source }
}

fn block(height: u64) -> FeedMessage {
    FeedMessage::Event(RawEvent::Block(BlockEvent::at_height(height)))
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_three_tiers_one_alert() {
    let frame = r#"{"transactions":[
        {"txid":"01","value":1000000,"rate":8},
        {"txid":"02","value":2000000000,"rate":30},
        {"txid":"03","value":50000000000,"feePerVsize":55}
    ]}"#;
    let transport = ScriptedTransport::with_script([LinkScript::Open {
        frames: vec![frame.into()],
        close: false,
    }]);
    let session = SessionConfig::default();
    let recorder = RecordingCollaborator::new();
    let connector = FeedConnector::new(settings(), Some(Arc::new(transport)), None);
    let mut coordinator = LifecycleCoordinator::new(
        &session,
        connector,
        CollaboratorSet::new().with(Box::new(recorder.clone())),
    );
    let lifecycle = coordinator.lifecycle_handle();

    let task = tokio::spawn(async move {
        coordinator.run().await;
        coordinator
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    lifecycle.unload();
    let coordinator = task.await.unwrap();

    assert_eq!(
        recorder.spawned_tiers(),
        vec![Tier::Minor, Tier::Notable, Tier::Extreme]
    );
    assert_eq!(
        recorder.filter(|c| matches!(c, CollaboratorCall::Alert(..))),
        vec![CollaboratorCall::Alert(Tier::Extreme, 500.0)]
    );
    assert!(coordinator.is_disposed());
    assert_eq!(coordinator.overlay().shown(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_synthetic_blocks_advance_height() {
    let mut session = SessionConfig::default();
    session.demo.block_probability = 1.0;
    session.demo.block_tick = Duration::from_secs(1);
    let recorder = RecordingCollaborator::new();
    let connector =
        FeedConnector::new(FeedSettings::from_session(&session), None, None).with_demo_seed(31);
    let mut coordinator = LifecycleCoordinator::new(
        &session,
        connector,
        CollaboratorSet::new().with(Box::new(recorder.clone())),
    );
    let lifecycle = coordinator.lifecycle_handle();

    let task = tokio::spawn(async move {
        coordinator.run().await;
        coordinator
    });
    tokio::time::sleep(Duration::from_millis(3500)).await;
    lifecycle.unload();
    let coordinator = task.await.unwrap();

    let blocks: Vec<u64> = recorder
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            CollaboratorCall::BlockFound(height) => Some(height),
            _ => None,
        })
        .collect();
    assert!(blocks.len() >= 2, "{blocks:?}");
    assert_eq!(blocks[..2], [878_001, 878_002]);

    let heights: Vec<u64> = recorder
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            CollaboratorCall::HeightChanged(height) => Some(height),
            _ => None,
        })
        .collect();
    assert_eq!(heights[0], 878_000);
    assert!(heights.windows(2).all(|w| w[0] <= w[1]), "{heights:?}");
    assert_eq!(coordinator.pipeline().display().blocks_found, blocks.len() as u64);
}

#[test]
fn test_scenario_c_height_never_decreases() {
    let (mut pipeline, recorder) = recorded_pipeline(&SessionConfig::default());
    let now = Instant::now();
    let h = 880_000;

    pipeline.handle(height(h, HeightSource::Push), now);
    pipeline.handle(height(h - 1, HeightSource::Poll), now);
    assert_eq!(pipeline.display().height, Some(h));

    // A stale block from another source animates nothing
    let outcome = pipeline.handle(block(h - 1), now);
    assert_eq!(outcome.block, None);
    assert_eq!(pipeline.display().height, Some(h));

    pipeline.handle(block(h + 1), now);
    pipeline.handle(height(h, HeightSource::Poll), now);
    assert_eq!(pipeline.display().height, Some(h + 1));
    assert_eq!(recorder.heights(), vec![h, h + 1]);
    assert_eq!(
        recorder.filter(|c| matches!(c, CollaboratorCall::BlockFound(_))),
        vec![CollaboratorCall::BlockFound(h + 1)]
    );
}

#[test]
fn test_scenario_d_alerts_inside_window_are_dropped() {
    let (mut pipeline, recorder) = recorded_pipeline(&SessionConfig::default());
    let now = Instant::now();

    let first = pipeline.handle(transaction(200 * SATS_PER_COIN), now);
    let second = pipeline.handle(
        transaction(300 * SATS_PER_COIN),
        now + Duration::from_millis(100),
    );
    assert!(first.alert.is_some());
    assert!(second.alert.is_none());
    // Both entities still spawn
    assert!(second.spawned.is_some());
    assert_eq!(recorder.alert_count(), 1);
    assert_eq!(pipeline.throttle().dropped(), 1);

    let third = pipeline.handle(
        transaction(300 * SATS_PER_COIN),
        now + Duration::from_millis(600),
    );
    assert!(third.alert.is_some());
    assert_eq!(recorder.alert_count(), 2);
}

#[test]
fn test_population_stays_bounded() {
    let session = SessionConfig::default();
    let capacity = session.scene.ledger_capacity;
    let (mut pipeline, recorder) = recorded_pipeline(&session);
    let now = Instant::now();

    for i in 0..(capacity as u64 * 3) {
        pipeline.handle(transaction(1_000 + i), now);
        assert!(pipeline.ledger().len() <= capacity);
    }
    let stats = pipeline.stats();
    assert_eq!(stats.total, capacity);
    assert_eq!(stats.evicted, capacity as u64 * 2);
    assert_eq!(
        recorder
            .filter(|c| matches!(c, CollaboratorCall::Removed(_)))
            .len(),
        capacity * 2
    );
    // Oldest first
    let oldest = pipeline.ledger().iter().next().unwrap();
    assert_eq!(oldest.value_sats(), 1_000 + capacity as u64 * 2);
}

#[test]
fn test_templates_are_shared_per_key() {
    let (mut pipeline, _) = recorded_pipeline(&SessionConfig::default());
    let now = Instant::now();
    for value in [1, 2, 3, 20 * SATS_PER_COIN, 30 * SATS_PER_COIN] {
        pipeline.handle(transaction(value), now);
    }
    // Minor (4 shapes) + Notable (6 shapes)
    assert_eq!(pipeline.pool().len(), 10);
    assert_eq!(pipeline.pool().created(), 10);

    let minors: Vec<_> = pipeline
        .ledger()
        .iter()
        .filter(|e| e.tier() == Tier::Minor)
        .collect();
    for pair in minors.windows(2) {
        for (a, b) in pair[0].templates().iter().zip(pair[1].templates()) {
            assert!(Arc::ptr_eq(a, b));
        }
    }
}

#[test]
fn test_entities_leave_view_and_are_reported_once() {
    let (mut pipeline, recorder) = recorded_pipeline(&SessionConfig::default());
    let now = Instant::now();
    let id = pipeline.handle(transaction(5_000), now).spawned.unwrap();

    let mut removed = Vec::new();
    for frame in 0..1_000 {
        removed.extend(pipeline.tick(1.0 / 60.0, now + Duration::from_millis(frame * 16)));
    }
    assert_eq!(removed, vec![id]);
    assert!(pipeline.ledger().is_empty());
    assert_eq!(
        recorder.filter(|c| *c == CollaboratorCall::Removed(id)).len(),
        1
    );
    assert_eq!(pipeline.stats().exited, 1);
}
