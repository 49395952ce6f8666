// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway assembly and lifecycle.
//!
//! Wires the registry, bridge, session hubs, router, metrics, and HTTP
//! surface together, then runs until a shutdown signal. Shutdown order:
//! stop the periodic loops and the bridge, let the HTTP server drain, close
//! every downstream session with its shutdown code or event, flush metrics
//! one last time, exit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use parley_bridge::ChatBridge;
use parley_config::ParleyConfig;
use parley_core::{ParleyError, UpstreamBridge};
use parley_gateway::{start_server, GatewayState, RateSettings};
use parley_gateway::idempotency::IdempotencyCache;
use parley_gateway::rate_limit::RateLimiter;
use parley_metrics::GatewayMetrics;
use parley_registry::{AgentRegistry, ConfigSource};
use parley_router::{LogInject, Router};
use parley_session::{
    EventLog, ReadTracker, SocketHub, StreamEvent, StreamHub, CLOSE_GOING_AWAY,
};

pub async fn run(config: ParleyConfig) -> Result<(), ParleyError> {
    let state_dir = PathBuf::from(&config.storage.state_dir);
    tokio::fs::create_dir_all(&state_dir)
        .await
        .map_err(|e| ParleyError::Storage { source: Box::new(e) })?;

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());
    let metrics = Arc::new(GatewayMetrics::new());

    // Registry: endpoint when enabled, file fallback for bootstrap. Neither
    // available is a startup failure.
    let endpoint = config
        .registry
        .endpoint_enabled
        .then(|| {
            format!(
                "{}/api/agents/config",
                config.upstream.base_url.trim_end_matches('/')
            )
        });
    let source = ConfigSource::new(
        endpoint,
        config.upstream.gateway_token.clone(),
        config.registry.file.as_ref().map(PathBuf::from),
    )?;
    let registry = Arc::new(AgentRegistry::bootstrap(source, metrics.clone()).await?);

    // Upstream bridge.
    let gateway_token = config
        .upstream
        .gateway_token
        .clone()
        .ok_or_else(|| ParleyError::Config("upstream.gateway_token is required".into()))?;
    let (bridge, inbound_rx) = ChatBridge::new(
        config.upstream.base_url.clone(),
        config.upstream.feed_url(),
        config.upstream.gateway_username.clone(),
        gateway_token,
        state_dir.join("credential.json"),
    )
    .await?;
    let bridge = Arc::new(bridge);
    let bridge_task = bridge.start(cancel.clone());
    let bridge_dyn: Arc<dyn UpstreamBridge> = bridge.clone();

    // Downstream session state.
    let sockets = Arc::new(SocketHub::new());
    let streams = Arc::new(StreamHub::new());
    let event_log = Arc::new(EventLog::open(state_dir.join("event_id.checkpoint")).await);
    let read_tracker = Arc::new(ReadTracker::load(state_dir.join("read_tracker.json")).await);

    // Router consumes the bridge's inbound queue.
    let router = Router::new(
        registry.clone(),
        bridge_dyn.clone(),
        sockets.clone(),
        streams.clone(),
        event_log.clone(),
        read_tracker.clone(),
        metrics.clone(),
        Arc::new(LogInject),
    );
    let router_task = tokio::spawn(router.run(inbound_rx, cancel.clone()));

    // Periodic loops.
    let refresh_task = parley_registry::spawn_refresh_task(
        registry.clone(),
        Duration::from_secs(config.registry.refresh_interval_secs),
        cancel.clone(),
    );
    let flush_task = parley_metrics::spawn_flush_task(
        metrics.clone(),
        state_dir.join("metrics.jsonl"),
        cancel.clone(),
    );

    let state = GatewayState {
        registry,
        bridge: bridge_dyn,
        sockets: sockets.clone(),
        streams: streams.clone(),
        event_log,
        metrics,
        idempotency: Arc::new(IdempotencyCache::new()),
        rate_limiter: Arc::new(RateLimiter::new()),
        rates: RateSettings {
            max_content_length: config.limits.max_content_length,
            sends_per_minute_standard: config.limits.sends_per_minute_standard,
            sends_per_minute_elevated: config.limits.sends_per_minute_elevated,
        },
        start_time: Instant::now(),
    };

    // Serves until the cancellation token fires.
    start_server(&config.gateway.host, config.gateway.port, state, cancel.clone()).await?;

    close_downstream_sessions(&sockets, &streams);

    let _ = router_task.await;
    let _ = bridge_task.await;
    let _ = refresh_task.await;
    // The flush task writes a final snapshot on cancellation.
    let _ = flush_task.await;

    info!("gateway stopped");
    Ok(())
}

/// Cancel the token once the process receives a shutdown signal.
fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
                    _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, watching SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
                info!("SIGINT received, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, shutting down");
    }
}

/// Close every downstream session: sockets get the going-away close code,
/// streams get a final `shutdown` event before their connections drop.
fn close_downstream_sessions(sockets: &SocketHub, streams: &StreamHub) {
    let socket_handles = sockets.drain();
    let stream_handles = streams.drain();
    info!(
        sockets = socket_handles.len(),
        streams = stream_handles.len(),
        "closing downstream sessions"
    );
    for handle in socket_handles {
        handle.send_close(CLOSE_GOING_AWAY, "gateway shutting down");
    }
    for handle in stream_handles {
        let _ = handle.tx.try_send(StreamEvent {
            id: None,
            name: "shutdown",
            data: "{}".into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_session::{SocketCommand, SocketHandle, StreamHandle};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn close_downstream_sessions_notifies_every_peer() {
        let sockets = SocketHub::new();
        let streams = StreamHub::new();

        let (sock_tx, mut sock_rx) = mpsc::channel(8);
        sockets.install(
            "p1",
            SocketHandle {
                conn_id: "c1".into(),
                username: "p1".into(),
                token: "byoa_p1".into(),
                tx: sock_tx,
            },
        );
        let (stream_tx, mut stream_rx) = mpsc::channel(8);
        streams
            .register(
                "p1",
                StreamHandle {
                    stream_id: "s1".into(),
                    resumed_from: 0,
                    tx: stream_tx,
                },
            )
            .unwrap();

        close_downstream_sessions(&sockets, &streams);

        assert!(matches!(
            sock_rx.recv().await,
            Some(SocketCommand::Close { code, .. }) if code == CLOSE_GOING_AWAY
        ));
        let event = stream_rx.recv().await.unwrap();
        assert_eq!(event.name, "shutdown");
        assert!(event.id.is_none());

        assert_eq!(sockets.session_count(), 0);
        assert_eq!(streams.stream_count("p1"), 0);
    }
}
