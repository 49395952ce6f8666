// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST surface.
//!
//! Send endpoints forward to the upstream under the calling agent's own
//! token. Successful sends with an idempotency key are cached so retries
//! return the identical body.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use parley_core::{Agent, ParleyError};

use crate::server::GatewayState;

/// Request body for `POST /byoa/sse/messages`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub room_id: String,
    pub content: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Request body for the legacy `POST /send`.
#[derive(Debug, Deserialize)]
pub struct LegacySendRequest {
    pub room: String,
    pub content: String,
}

/// Successful send response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub message_id: String,
}

/// Reject empty and oversized content before it reaches the upstream.
pub fn validate_content(content: &str, max_chars: usize) -> Result<(), ParleyError> {
    if content.is_empty() {
        return Err(ParleyError::InvalidInput("content must not be empty".into()));
    }
    let chars = content.chars().count();
    if chars > max_chars {
        return Err(ParleyError::InvalidInput(format!(
            "content is {chars} chars, limit is {max_chars}"
        )));
    }
    Ok(())
}

/// Map a [`ParleyError`] onto the HTTP surface.
pub fn error_response(err: ParleyError) -> Response {
    let status = match &err {
        ParleyError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ParleyError::Auth(_) => StatusCode::UNAUTHORIZED,
        ParleyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ParleyError::BridgeUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ParleyError::UpstreamSend { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    (status, Json(body)).into_response()
}

/// POST /byoa/sse/messages
///
/// Send a room message as the authenticated agent. Honors idempotency keys
/// for one hour.
pub async fn post_message(
    State(state): State<GatewayState>,
    Extension(agent): Extension<Agent>,
    Json(body): Json<MessageRequest>,
) -> Response {
    if let Err(e) = validate_content(&body.content, state.rates.max_content_length) {
        return error_response(e);
    }

    if let Some(key) = &body.idempotency_key {
        if let Some(cached) = state.idempotency.get(&agent.id, key) {
            return (
                StatusCode::OK,
                [("content-type", "application/json")],
                cached,
            )
                .into_response();
        }
    }

    match state
        .bridge
        .send_as(&agent.token, &body.room_id, &body.content)
        .await
    {
        Ok(receipt) => {
            state.metrics.message_sent();
            let response = SendResponse {
                message_id: receipt.message_id,
            };
            let body_text = serde_json::to_string(&response)
                .unwrap_or_else(|_| "{}".to_string());
            if let Some(key) = &body.idempotency_key {
                state.idempotency.put(&agent.id, key, body_text.clone());
            }
            (
                StatusCode::OK,
                [("content-type", "application/json")],
                body_text,
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// POST /send
///
/// Legacy send surface; same semantics, older body shape, no idempotency.
pub async fn post_legacy_send(
    State(state): State<GatewayState>,
    Extension(agent): Extension<Agent>,
    Json(body): Json<LegacySendRequest>,
) -> Response {
    if let Err(e) = validate_content(&body.content, state.rates.max_content_length) {
        return error_response(e);
    }

    match state
        .bridge
        .send_as(&agent.token, &body.room, &body.content)
        .await
    {
        Ok(receipt) => {
            state.metrics.message_sent();
            (
                StatusCode::OK,
                Json(SendResponse {
                    message_id: receipt.message_id,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /byoa/sse/status
///
/// Session status for the calling agent.
pub async fn get_status(
    State(state): State<GatewayState>,
    Extension(agent): Extension<Agent>,
) -> Json<serde_json::Value> {
    Json(json!({
        "agent": {
            "id": agent.id,
            "username": agent.username,
            "trustLevel": agent.trust,
        },
        "socketConnected": state.sockets.is_connected(&agent.id),
        "streamCount": state.streams.stream_count(&agent.id),
        "lastEventId": state.event_log.last_id(),
        "bridgeConnected": state.bridge.is_connected(),
    }))
}

/// GET /byoa/sse/health: unauthenticated liveness.
pub async fn get_sse_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /health: liveness plus the connected agent list.
pub async fn get_health(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let mut connected = state.sockets.connected_usernames();
    connected.sort();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "bridgeConnected": state.bridge.is_connected(),
        "connectedAgents": connected,
    }))
}

/// GET /metrics: human-readable counter report.
pub async fn get_metrics_text(State(state): State<GatewayState>) -> String {
    state.metrics.render_text()
}

/// GET /metrics/json: structured snapshot.
pub async fn get_metrics_json(State(state): State<GatewayState>) -> Response {
    Json(state.metrics.snapshot()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_request_parses_camel_case() {
        let json = r#"{"roomId": "r-1", "content": "hi", "idempotencyKey": "k1"}"#;
        let req: MessageRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.room_id, "r-1");
        assert_eq!(req.idempotency_key.as_deref(), Some("k1"));
    }

    #[test]
    fn message_request_key_is_optional() {
        let req: MessageRequest =
            serde_json::from_str(r#"{"roomId": "r-1", "content": "hi"}"#).unwrap();
        assert!(req.idempotency_key.is_none());
    }

    #[test]
    fn legacy_request_uses_room_field() {
        let req: LegacySendRequest =
            serde_json::from_str(r#"{"room": "r-1", "content": "hi"}"#).unwrap();
        assert_eq!(req.room, "r-1");
    }

    #[test]
    fn content_boundary_at_4000_chars() {
        let exactly = "a".repeat(4_000);
        assert!(validate_content(&exactly, 4_000).is_ok());

        let over = "a".repeat(4_001);
        assert!(validate_content(&over, 4_000).is_err());

        assert!(validate_content("", 4_000).is_err());
    }

    #[test]
    fn content_limit_counts_chars_not_bytes() {
        // 4000 multibyte characters are within a 4000-char limit.
        let content = "\u{00e9}".repeat(4_000);
        assert!(validate_content(&content, 4_000).is_ok());
    }

    #[test]
    fn error_mapping_covers_classified_failures() {
        let cases = [
            (ParleyError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (ParleyError::Auth("x".into()), StatusCode::UNAUTHORIZED),
            (ParleyError::BridgeUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (
                ParleyError::UpstreamSend {
                    status: Some(500),
                    message: "x".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                ParleyError::RateLimited { retry_after_secs: 5 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (ParleyError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(err).status(), expected);
        }
    }
}
