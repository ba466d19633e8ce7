//! Integration tests for the feed connector: backoff, demo fallback and source exclusivity.

mod common;

use common::{settings, FlakyApi, LinkScript, ScriptedTransport};
use satoshis_grid::collaborator::{CollaboratorCall, RecordingCollaborator};
use satoshis_grid::config::{SceneConfig, SessionConfig};
use satoshis_grid::feed::protocol;
use satoshis_grid::feed::FeedConnector;
use satoshis_grid::model::{ConnectionState, FeedMessage, RawEvent, Tier};
use satoshis_grid::pipeline::Classifier;
use satoshis_grid::{CollaboratorSet, LifecycleCoordinator};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Receive until `state` is announced, returning every state seen on the way.
async fn states_until(feed: &mut FeedConnector, state: ConnectionState) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    while let Some(message) = feed.recv().await {
        if let FeedMessage::Connection(next) = message {
            seen.push(next);
            if next == state {
                break;
            }
        }
    }
    seen
}

/// Everything the connector emits until `deadline`.
async fn drain_until(feed: &mut FeedConnector, deadline: Instant) -> Vec<FeedMessage> {
    let mut messages = Vec::new();
    while let Ok(Some(message)) = tokio::time::timeout_at(deadline, feed.recv()).await {
        messages.push(message);
    }
    messages
}

#[tokio::test(start_paused = true)]
async fn test_eleven_closures_switch_to_demo() {
    let transport = ScriptedTransport::refusing();
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport.clone())), None)
        .with_demo_seed(42);

    let started = Instant::now();
    feed.start();
    let states = states_until(&mut feed, ConnectionState::Demo).await;
    let elapsed = started.elapsed();

    let mut expected = vec![ConnectionState::Connecting];
    expected.extend((1..=10).map(|attempt| ConnectionState::Reconnecting { attempt }));
    expected.push(ConnectionState::Demo);
    assert_eq!(states, expected);
    assert_eq!(transport.connects(), 11);

    // 2s × (1 + 2 + ... + 10)
    assert!(elapsed >= Duration::from_secs(110), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(111), "elapsed {elapsed:?}");

    let sources = feed.sources();
    assert!(sources.demo);
    assert!(!sources.reconnect_timer);
    assert!(!sources.push_link);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_handshakes_degrade_to_demo() {
    let transport = ScriptedTransport::stalling(11);
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport.clone())), None)
        .with_demo_seed(8);

    let started = Instant::now();
    feed.start();
    let states = states_until(&mut feed, ConnectionState::Demo).await;
    let elapsed = started.elapsed();

    assert_eq!(states.len(), 12, "{states:?}");
    assert_eq!(states[1], ConnectionState::Reconnecting { attempt: 1 });
    assert_eq!(transport.connects(), 11);

    // 11 × 10s handshake timeout plus 2s × (1 + 2 + ... + 10)
    assert!(elapsed >= Duration::from_secs(220), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(221), "elapsed {elapsed:?}");
    assert!(!feed.sources().push_link);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_handshake_counts_as_closure() {
    let transport = ScriptedTransport::stalling(1);
    transport.push(LinkScript::Open {
        frames: Vec::new(),
        close: false,
    });
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport.clone())), None);

    feed.start();
    let states = states_until(&mut feed, ConnectionState::Open).await;
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Reconnecting { attempt: 1 },
            ConnectionState::Open,
        ]
    );
    assert_eq!(transport.connects(), 2);
    assert_eq!(feed.reconnect_attempt(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_demo_schedules_no_further_reconnects() {
    let transport = ScriptedTransport::refusing();
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport.clone())), None)
        .with_demo_seed(1);
    feed.start();
    states_until(&mut feed, ConnectionState::Demo).await;

    let later = drain_until(&mut feed, Instant::now() + Duration::from_secs(600)).await;
    assert_eq!(transport.connects(), 11);
    assert!(later
        .iter()
        .all(|m| !matches!(m, FeedMessage::Connection(_))));
    assert_eq!(feed.state(), ConnectionState::Demo);
}

#[tokio::test(start_paused = true)]
async fn test_demo_distribution_after_fallback() {
    let transport = ScriptedTransport::refusing();
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport)), None)
        .with_demo_seed(2024);
    feed.start();
    states_until(&mut feed, ConnectionState::Demo).await;

    let classifier = Classifier::new(&SceneConfig::default());
    let mut counts = [0usize; 4];
    let n = 1_000;
    let mut seen = 0;
    while seen < n {
        if let Some(FeedMessage::Event(RawEvent::Transaction(tx))) = feed.recv().await {
            let idx = Tier::ALL
                .iter()
                .position(|t| *t == classifier.tier(tx.value_sats))
                .unwrap();
            counts[idx] += 1;
            seen += 1;
        }
    }

    let share = |i: usize| counts[i] as f64 / n as f64;
    assert!((share(0) - 0.70).abs() < 0.05, "{counts:?}");
    assert!((share(1) - 0.25).abs() < 0.05, "{counts:?}");
    assert!((share(2) - 0.04).abs() < 0.03, "{counts:?}");
    assert!((share(3) - 0.01).abs() < 0.015, "{counts:?}");
}

#[tokio::test(start_paused = true)]
async fn test_restart_from_demo_stops_generator_first() {
    let transport = ScriptedTransport::refusing();
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport.clone())), None)
        .with_demo_seed(3);
    feed.start();
    states_until(&mut feed, ConnectionState::Demo).await;
    assert!(feed.sources().demo);

    transport.push(LinkScript::Open {
        frames: Vec::new(),
        close: false,
    });
    feed.start();
    let sources = feed.sources();
    assert!(!sources.demo, "demo still running next to the push link");
    assert!(sources.push_link);
    assert_eq!(feed.state(), ConnectionState::Connecting);

    assert_eq!(
        states_until(&mut feed, ConnectionState::Open).await,
        vec![ConnectionState::Connecting, ConnectionState::Open]
    );
    assert_eq!(feed.reconnect_attempt(), 0);

    // No synthetic traffic once the push link is up
    let after = drain_until(&mut feed, Instant::now() + Duration::from_secs(30)).await;
    assert!(after.is_empty(), "unexpected messages: {after:?}");
}

#[tokio::test(start_paused = true)]
async fn test_running_session_reconnects_on_request() {
    let transport = ScriptedTransport::refusing();
    let recorder = RecordingCollaborator::new();
    let connector = FeedConnector::new(settings(), Some(Arc::new(transport.clone())), None)
        .with_demo_seed(6);
    let mut coordinator = LifecycleCoordinator::new(
        &SessionConfig::default(),
        connector,
        CollaboratorSet::new().with(Box::new(recorder.clone())),
    );
    let lifecycle = coordinator.lifecycle_handle();
    let task = tokio::spawn(async move {
        coordinator.run().await;
        coordinator
    });

    // 2s × (1 + 2 + ... + 10) until demo mode
    tokio::time::sleep(Duration::from_secs(115)).await;
    assert_eq!(transport.connects(), 11);
    assert!(recorder
        .calls()
        .contains(&CollaboratorCall::Connection(ConnectionState::Demo)));

    transport.push(LinkScript::Open {
        frames: Vec::new(),
        close: false,
    });
    assert!(lifecycle.reconnect());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!task.is_finished());

    lifecycle.unload();
    let coordinator = task.await.unwrap();
    assert_eq!(transport.connects(), 12);
    let states: Vec<ConnectionState> = recorder
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            CollaboratorCall::Connection(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states[states.len() - 3..],
        [
            ConnectionState::Demo,
            ConnectionState::Connecting,
            ConnectionState::Open
        ]
    );
    assert!(coordinator.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn test_start_while_open_is_noop() {
    let transport = ScriptedTransport::with_script([LinkScript::Open {
        frames: Vec::new(),
        close: false,
    }]);
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport.clone())), None);
    feed.start();
    states_until(&mut feed, ConnectionState::Open).await;
    feed.start();
    assert_eq!(feed.state(), ConnectionState::Open);
    assert_eq!(transport.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_successful_handshake_resets_attempts() {
    let transport = ScriptedTransport::with_script([
        LinkScript::Refuse,
        LinkScript::Refuse,
        LinkScript::Open {
            frames: Vec::new(),
            close: true,
        },
        LinkScript::Refuse,
    ]);
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport)), None);
    feed.start();
    assert_eq!(
        states_until(&mut feed, ConnectionState::Reconnecting { attempt: 1 }).await,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Reconnecting { attempt: 1 }
        ]
    );
    let states = states_until(&mut feed, ConnectionState::Open).await;
    assert_eq!(
        states,
        vec![
            ConnectionState::Reconnecting { attempt: 2 },
            ConnectionState::Open
        ]
    );
    // The link closes right after opening; counting restarts at 1
    assert_eq!(
        states_until(&mut feed, ConnectionState::Reconnecting { attempt: 1 }).await,
        vec![ConnectionState::Reconnecting { attempt: 1 }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frames_are_dropped() {
    let valid = r#"{"transactions":[{"txid":"aa","value":25000000,"rate":14}]}"#;
    let transport = ScriptedTransport::with_script([LinkScript::Open {
        frames: vec![
            "not json".into(),
            "[1, 2, 3]".into(),
            r#"{"transactions":[{"value":5}]}"#.into(),
            valid.into(),
        ],
        close: false,
    }]);
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport)), None);
    feed.start();

    let messages = drain_until(&mut feed, Instant::now() + Duration::from_secs(5)).await;
    let events: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            FeedMessage::Event(RawEvent::Transaction(tx)) => Some(tx),
            _ => None,
        })
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].txid, "aa");
    assert_eq!(events[0].value_sats, 25_000_000);
    assert_eq!(events[0].fee_rate, Some(14.0));
    assert_eq!(feed.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_block_resends_track_directive() {
    let transport = ScriptedTransport::with_script([LinkScript::Open {
        frames: vec![r#"{"block":{"height":900001,"id":"00ab","tx_count":3100}}"#.into()],
        close: false,
    }]);
    let mut feed = FeedConnector::new(settings(), Some(Arc::new(transport.clone())), None);
    feed.start();

    let messages = drain_until(&mut feed, Instant::now() + Duration::from_secs(1)).await;
    assert!(messages.iter().any(|m| matches!(
        m,
        FeedMessage::Event(RawEvent::Block(block)) if block.height == 900_001
    )));
    assert_eq!(feed.last_height(), Some(900_001));

    let track = protocol::track_next_block().unwrap();
    let sent = transport.sent();
    assert_eq!(sent.len(), 3, "{sent:?}");
    assert!(sent[0].contains("\"want\""));
    assert_eq!(sent[1], track);
    assert_eq!(sent[2], track);
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_keeps_last_value() {
    let api = Arc::new(FlakyApi::new(97_250.0, 1));
    let mut feed = FeedConnector::new(settings(), None, Some(api.clone())).with_demo_seed(8);
    feed.start();
    assert_eq!(feed.sources().pollers, 6);

    let messages = drain_until(&mut feed, Instant::now() + Duration::from_secs(95)).await;
    let prices: Vec<f64> = messages
        .iter()
        .filter_map(|m| match m {
            FeedMessage::Price(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(prices, vec![97_250.0]);
    // Immediate first tick, then every 30s
    assert!(api.price_calls.load(Ordering::SeqCst) >= 4);
    assert!(feed.sources().pollers > 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pollers_and_demo() {
    let api = Arc::new(FlakyApi::new(1.0, u32::MAX));
    let mut feed = FeedConnector::new(settings(), None, Some(api.clone()));
    feed.start();
    drain_until(&mut feed, Instant::now() + Duration::from_secs(5)).await;

    assert!(feed.stop());
    let calls = api.price_calls.load(Ordering::SeqCst);
    let late = drain_until(&mut feed, Instant::now() + Duration::from_secs(120)).await;
    assert!(late.is_empty());
    assert_eq!(api.price_calls.load(Ordering::SeqCst), calls);
    assert_eq!(feed.state(), ConnectionState::Disconnected);
}
