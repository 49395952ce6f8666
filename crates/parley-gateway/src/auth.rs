// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bearer authentication middleware.
//!
//! Every request is resolved against the registry's *current* snapshot; a
//! token may stop working between any two requests, which is the point.
//! The resolved agent rides on request extensions. A rejected token that
//! still maps to a live session raises the revocation metric: the session
//! outlived its token.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::server::GatewayState;

/// Extract the bearer token from an Authorization header.
pub fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware validating the bearer token against the registry.
pub async fn auth_middleware(
    State(state): State<GatewayState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let Some(token) = bearer_token(&request) else {
        state.metrics.auth_failure();
        return Err(unauthorized("missing bearer token"));
    };

    match state.registry.authenticate(token) {
        Some(agent) => {
            request.extensions_mut().insert(agent);
            Ok(next.run(request).await)
        }
        None => {
            state.metrics.auth_failure();
            // A live session still holding this token means it was revoked
            // out from under an open connection.
            if state.sockets.has_session_with_token(token) {
                state.metrics.revoked_while_connected();
            }
            Err(unauthorized("unknown or inactive token"))
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": "AUTH_FAILED",
            "message": message,
        })),
    )
        .into_response()
}
