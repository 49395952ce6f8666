// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state. The socket endpoint
//! authenticates in-band with its first frame, so it sits outside the
//! bearer middleware; everything else under `/byoa` requires a token on
//! the request.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use parley_core::{ParleyError, UpstreamBridge};
use parley_metrics::GatewayMetrics;
use parley_registry::AgentRegistry;
use parley_session::{EventLog, SocketHub, StreamHub};

use crate::auth::auth_middleware;
use crate::handlers;
use crate::idempotency::IdempotencyCache;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::sse;
use crate::ws;

/// Request limit settings mirrored from `parley-config`.
#[derive(Debug, Clone, Copy)]
pub struct RateSettings {
    pub max_content_length: usize,
    pub sends_per_minute_standard: u32,
    pub sends_per_minute_elevated: u32,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            max_content_length: 4_000,
            sends_per_minute_standard: 10,
            sends_per_minute_elevated: 30,
        }
    }
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<AgentRegistry>,
    pub bridge: Arc<dyn UpstreamBridge>,
    pub sockets: Arc<SocketHub>,
    pub streams: Arc<StreamHub>,
    pub event_log: Arc<EventLog>,
    pub metrics: Arc<GatewayMetrics>,
    pub idempotency: Arc<IdempotencyCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rates: RateSettings,
    /// Process start time for uptime reporting.
    pub start_time: Instant,
}

/// Build the full gateway router.
pub fn build_router(state: GatewayState) -> Router {
    // Unauthenticated liveness and metrics pages.
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route("/byoa/sse/health", get(handlers::get_sse_health))
        .route("/metrics", get(handlers::get_metrics_text))
        .route("/metrics/json", get(handlers::get_metrics_json))
        .with_state(state.clone());

    // The send endpoint carries the per-principal rate limit on top of auth.
    let send_routes = Router::new()
        .route("/byoa/sse/messages", post(handlers::post_message))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    // Remaining authenticated routes.
    let api_routes = Router::new()
        .route("/byoa/sse/stream", get(sse::stream_handler))
        .route("/byoa/sse/status", get(handlers::get_status))
        .route("/send", post(handlers::post_legacy_send))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    // Socket route: auth happens on the first frame, not via middleware.
    let ws_routes = Router::new()
        .route("/byoa/ws", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(send_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
}

/// Bind and serve until the cancellation token fires.
pub async fn start_server(
    host: &str,
    port: u16,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), ParleyError> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ParleyError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| ParleyError::Internal(format!("gateway server error: {e}")))?;

    Ok(())
}
