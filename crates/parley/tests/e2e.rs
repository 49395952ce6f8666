// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios for the routing and send pipeline.
//!
//! Each test assembles the real router, hubs, event log, and read tracker
//! over a mock upstream bridge, then drives inbound messages through the
//! same paths the live gateway uses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::to_bytes;
use axum::extract::State;
use axum::{Extension, Json};
use tokio::sync::mpsc;

use parley_core::{Agent, DeliveryMode, ReceiveMode, TrustLevel};
use parley_gateway::handlers::{post_message, MessageRequest};
use parley_gateway::idempotency::IdempotencyCache;
use parley_gateway::rate_limit::RateLimiter;
use parley_gateway::{GatewayState, RateSettings};
use parley_metrics::GatewayMetrics;
use parley_router::{Router, WebhookDispatcher};
use parley_session::{
    EventLog, ReadTracker, ServerFrame, SocketCommand, SocketHandle, SocketHub, StreamEvent,
    StreamHandle, StreamHub, CLOSE_REPLACED,
};
use parley_test_utils::{
    agent, ai_message, human_message, registry_with, MockBridge, RecordingInject,
};

struct Harness {
    router: Router,
    bridge: Arc<MockBridge>,
    sockets: Arc<SocketHub>,
    streams: Arc<StreamHub>,
    event_log: Arc<EventLog>,
    read_tracker: Arc<ReadTracker>,
    metrics: Arc<GatewayMetrics>,
    registry: Arc<parley_registry::AgentRegistry>,
}

async fn harness(agents: Vec<Agent>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let state_dir = dir.path().to_path_buf();
    std::mem::forget(dir);

    let metrics = Arc::new(GatewayMetrics::new());
    let registry = registry_with(agents, metrics.clone()).await;
    let bridge = MockBridge::connected();
    let sockets = Arc::new(SocketHub::new());
    let streams = Arc::new(StreamHub::new());
    let event_log = Arc::new(EventLog::open(state_dir.join("event_id.checkpoint")).await);
    let read_tracker = Arc::new(ReadTracker::load(state_dir.join("read_tracker.json")).await);

    let router = Router::new(
        registry.clone(),
        bridge.clone(),
        sockets.clone(),
        streams.clone(),
        event_log.clone(),
        read_tracker.clone(),
        metrics.clone(),
        RecordingInject::new(),
    )
    .with_webhook_dispatcher(
        WebhookDispatcher::new(metrics.clone())
            .with_backoff(vec![Duration::ZERO, Duration::from_millis(5)]),
    );

    Harness {
        router,
        bridge,
        sockets,
        streams,
        event_log,
        read_tracker,
        metrics,
        registry,
    }
}

fn install_socket(harness: &Harness, principal: &str) -> mpsc::Receiver<SocketCommand> {
    let (tx, rx) = mpsc::channel(32);
    harness.sockets.install(
        principal,
        SocketHandle {
            conn_id: format!("conn-{principal}-{}", uuid_suffix()),
            username: principal.to_string(),
            token: format!("byoa_{principal}"),
            tx,
        },
    );
    rx
}

fn register_stream(harness: &Harness, principal: &str) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(32);
    harness
        .streams
        .register(
            principal,
            StreamHandle {
                stream_id: format!("stream-{principal}-{}", uuid_suffix()),
                resumed_from: 0,
                tx,
            },
        )
        .unwrap();
    rx
}

fn uuid_suffix() -> u128 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static N: AtomicU64 = AtomicU64::new(0);
    u128::from(N.fetch_add(1, Ordering::Relaxed))
}

fn gateway_state(harness: &Harness) -> GatewayState {
    GatewayState {
        registry: harness.registry.clone(),
        bridge: harness.bridge.clone(),
        sockets: harness.sockets.clone(),
        streams: harness.streams.clone(),
        event_log: harness.event_log.clone(),
        metrics: harness.metrics.clone(),
        idempotency: Arc::new(IdempotencyCache::new()),
        rate_limiter: Arc::new(RateLimiter::new()),
        rates: RateSettings::default(),
        start_time: Instant::now(),
    }
}

// ---- Scenario: mention delivery with unread context ----

#[tokio::test]
async fn mention_delivery_materializes_unread_context() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut bob = agent("bob");
    bob.receive = ReceiveMode::Mentions;
    bob.delivery = DeliveryMode::Webhook;
    bob.webhook_url = Some(format!("{}/hook", server.uri()));
    bob.webhook_secret = Some("shh".into());

    let harness = harness(vec![bob]).await;
    harness.read_tracker.advance("bob", "R", "msg-100").await;
    harness
        .bridge
        .set_history(vec![
            human_message("msg-101", "R", "alice", "working on it"),
            human_message("msg-102", "R", "carol", "same here"),
            human_message("msg-103", "R", "alice", "@bob status?"),
        ])
        .await;

    harness
        .router
        .route_message(human_message("msg-103", "R", "alice", "@bob status?"))
        .await;

    // The webhook POST runs on a spawned task; wait for it to land.
    let mut received = Vec::new();
    for _ in 0..100 {
        received = server.received_requests().await.unwrap();
        if !received.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received.len(), 1, "exactly one webhook delivery");

    let body: serde_json::Value = received[0].body_json().unwrap();
    assert_eq!(body["messageId"], "msg-103");
    let context = body["context"].as_array().unwrap();
    assert_eq!(context.len(), 2, "msg-101 and msg-102, not the mention");
    assert_eq!(context[0]["sender"], "alice");
    assert_eq!(context[1]["sender"], "carol");

    assert_eq!(
        harness.read_tracker.get("bob", "R").await.as_deref(),
        Some("msg-103"),
        "cursor advances to the mention"
    );

    // The fetch used the stored cursor and the context limit.
    let fetches = harness.bridge.recorded_fetches().await;
    assert_eq!(fetches[0].after_id, "msg-100");
    assert_eq!(fetches[0].limit, 50);
}

// ---- Scenario: loop-guard cooldown between elevated agents ----

#[tokio::test]
async fn loop_guard_cooldown_between_elevated_agents() {
    let mut x = agent("x");
    x.trust = TrustLevel::Elevated;
    x.receive = ReceiveMode::All;
    let mut y = agent("y");
    y.trust = TrustLevel::Elevated;
    y.receive = ReceiveMode::All;

    let harness = harness(vec![x.clone(), y.clone()]).await;
    let mut x_rx = install_socket(&harness, "x");
    let mut y_rx = install_socket(&harness, "y");

    // X mentions Y: guard bypassed, delivered, exchange recorded.
    harness
        .router
        .route_message(ai_message("m1", "R", &x, "@y ping"))
        .await;
    assert!(matches!(
        y_rx.try_recv(),
        Ok(SocketCommand::Frame(ServerFrame::Message(_)))
    ));

    // Y replies without a mention 10 s later (inside the cooldown): denied.
    harness
        .router
        .route_message(ai_message("m2", "R", &y, "ack"))
        .await;
    assert!(
        x_rx.try_recv().is_err(),
        "plain reply inside the cooldown must be dropped"
    );

    // Y replies with a mention: bypass again, delivered.
    harness
        .router
        .route_message(ai_message("m3", "R", &y, "@x ack"))
        .await;
    assert!(matches!(
        x_rx.try_recv(),
        Ok(SocketCommand::Frame(ServerFrame::Message(_)))
    ));
}

// ---- Scenario: stream resume replays missed events ----

#[tokio::test]
async fn stream_resume_replays_missed_events_in_order() {
    let mut w = agent("w");
    w.receive = ReceiveMode::All;
    let harness = harness(vec![w]).await;
    let mut rx = register_stream(&harness, "w");

    for n in 1..=3 {
        harness
            .router
            .route_message(human_message(&format!("m{n}"), "R", "alice", "live"))
            .await;
    }
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(rx.try_recv().unwrap());
    }
    let last_seen = seen.last().unwrap().id.unwrap();

    // Peer stops reading; three more messages arrive and are persisted.
    for n in 4..=6 {
        harness
            .router
            .route_message(human_message(&format!("m{n}"), "R", "alice", "missed"))
            .await;
    }

    // Reconnect with Last-Event-ID = last_seen: replay is ascending and
    // carries the original payloads.
    let replay = harness.event_log.since(last_seen);
    assert_eq!(replay.len(), 3);
    assert!(replay.windows(2).all(|w| w[0].event_id < w[1].event_id));
    for entry in &replay {
        let payload: serde_json::Value = serde_json::from_str(&entry.payload).unwrap();
        assert_eq!(payload["content"], "missed");
    }

    // Out-of-range resume id yields nothing.
    assert!(harness.event_log.since(replay.last().unwrap().event_id + 100).is_empty());
}

// ---- Scenario: replace-on-reconnect ----

#[tokio::test]
async fn newer_socket_replaces_prior_and_takes_traffic() {
    let mut u = agent("u");
    u.receive = ReceiveMode::All;
    let harness = harness(vec![u]).await;

    let mut s1_rx = install_socket(&harness, "u");

    // Second authentication for the same principal displaces the first,
    // exactly as the socket handler does it.
    let (s2_tx, mut s2_rx) = mpsc::channel(32);
    let prior = harness.sockets.install(
        "u",
        SocketHandle {
            conn_id: "conn-u-2".into(),
            username: "u".into(),
            token: "byoa_u".into(),
            tx: s2_tx,
        },
    );
    let prior = prior.expect("first session must be displaced");
    prior.send_frame(ServerFrame::Error {
        code: "REPLACED".into(),
        message: "a newer session authenticated for this agent".into(),
    });
    prior.send_close(CLOSE_REPLACED, "replaced");

    assert!(matches!(
        s1_rx.try_recv(),
        Ok(SocketCommand::Frame(ServerFrame::Error { code, .. })) if code == "REPLACED"
    ));
    assert!(matches!(
        s1_rx.try_recv(),
        Ok(SocketCommand::Close { code, .. }) if code == CLOSE_REPLACED
    ));

    // Subsequent traffic reaches only the new session.
    harness
        .router
        .route_message(human_message("m1", "R", "alice", "hello"))
        .await;
    assert!(matches!(
        s2_rx.try_recv(),
        Ok(SocketCommand::Frame(ServerFrame::Message(_)))
    ));
    assert!(s1_rx.try_recv().is_err());
}

// ---- Scenario: idempotent send replay ----

#[tokio::test]
async fn idempotent_send_replays_identical_body() {
    let bob = agent("bob");
    let harness = harness(vec![bob.clone()]).await;
    let state = gateway_state(&harness);

    let request = || MessageRequest {
        room_id: "R".into(),
        content: "hello".into(),
        idempotency_key: Some("key-1".into()),
    };

    let first = post_message(
        State(state.clone()),
        Extension(bob.clone()),
        Json(request()),
    )
    .await;
    assert_eq!(first.status(), 200);
    let first_body = to_bytes(first.into_body(), usize::MAX).await.unwrap();

    let second = post_message(
        State(state.clone()),
        Extension(bob.clone()),
        Json(request()),
    )
    .await;
    assert_eq!(second.status(), 200);
    let second_body = to_bytes(second.into_body(), usize::MAX).await.unwrap();

    assert_eq!(first_body, second_body, "replay must return the identical body");
    assert_eq!(
        harness.bridge.recorded_sends().await.len(),
        1,
        "the upstream saw exactly one send"
    );
}

// ---- Boundary: content length ----

#[tokio::test]
async fn content_boundary_enforced_on_send() {
    let bob = agent("bob");
    let harness = harness(vec![bob.clone()]).await;
    let state = gateway_state(&harness);

    let at_limit = post_message(
        State(state.clone()),
        Extension(bob.clone()),
        Json(MessageRequest {
            room_id: "R".into(),
            content: "a".repeat(4_000),
            idempotency_key: None,
        }),
    )
    .await;
    assert_eq!(at_limit.status(), 200);

    let over_limit = post_message(
        State(state.clone()),
        Extension(bob.clone()),
        Json(MessageRequest {
            room_id: "R".into(),
            content: "a".repeat(4_001),
            idempotency_key: None,
        }),
    )
    .await;
    assert_eq!(over_limit.status(), 400);
}

// ---- Failure path: bridge unavailable ----

#[tokio::test]
async fn send_fails_503_when_bridge_down() {
    let bob = agent("bob");
    let harness = harness(vec![bob.clone()]).await;
    harness.bridge.set_connected(false);
    let state = gateway_state(&harness);

    let response = post_message(
        State(state),
        Extension(bob),
        Json(MessageRequest {
            room_id: "R".into(),
            content: "hello".into(),
            idempotency_key: None,
        }),
    )
    .await;
    assert_eq!(response.status(), 503);
}
