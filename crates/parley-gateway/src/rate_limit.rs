// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-principal sliding-window rate limiting for the send endpoint.
//!
//! The window is introspectable on purpose: callers get the remaining
//! allowance for the `X-RateLimit-*` headers and the seconds until the
//! oldest hit leaves the window for `retryAfter`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;

use parley_core::{Agent, TrustLevel};

use crate::server::GatewayState;

/// Length of the rolling window.
const WINDOW: Duration = Duration::from_secs(60);

/// Outcome of a rate-limit check.
#[derive(Debug, PartialEq, Eq)]
pub enum RateDecision {
    /// Permitted; remaining allowance after this request.
    Allowed { limit: u32, remaining: u32 },
    /// Denied; seconds until a slot frees up.
    Limited { limit: u32, retry_after_secs: u64 },
}

/// Sliding-window hit tracker keyed by principal id.
#[derive(Debug, Default)]
pub struct RateLimiter {
    hits: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, principal_id: &str, limit: u32) -> RateDecision {
        self.check_at(principal_id, limit, Instant::now())
    }

    /// Clock-injectable variant of [`check`](Self::check).
    pub fn check_at(&self, principal_id: &str, limit: u32, now: Instant) -> RateDecision {
        let mut hits = self.hits.entry(principal_id.to_string()).or_default();
        while hits.front().map(|t| now - *t >= WINDOW).unwrap_or(false) {
            hits.pop_front();
        }

        if (hits.len() as u32) >= limit {
            let retry_after = hits
                .front()
                .map(|oldest| WINDOW.saturating_sub(now - *oldest))
                .unwrap_or(WINDOW);
            // Round up so clients never retry a second early.
            let retry_after_secs = retry_after.as_secs()
                + u64::from(retry_after.subsec_nanos() > 0);
            return RateDecision::Limited {
                limit,
                retry_after_secs: retry_after_secs.max(1),
            };
        }

        hits.push_back(now);
        RateDecision::Allowed {
            limit,
            remaining: limit - hits.len() as u32,
        }
    }
}

/// Middleware enforcing the per-principal send allowance. Must run after
/// the auth middleware so the agent extension is present.
pub async fn rate_limit_middleware(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(agent) = request.extensions().get::<Agent>().cloned() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let limit = match agent.trust {
        TrustLevel::Standard => state.rates.sends_per_minute_standard,
        TrustLevel::Elevated => state.rates.sends_per_minute_elevated,
    };

    match state.rate_limiter.check(&agent.id, limit) {
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", header_value(limit));
            headers.insert("X-RateLimit-Remaining", header_value(remaining));
            response
        }
        RateDecision::Limited {
            limit,
            retry_after_secs,
        } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({
                    "error": "RATE_LIMITED",
                    "retryAfter": retry_after_secs,
                })),
            )
                .into_response();
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", header_value(limit));
            headers.insert("X-RateLimit-Remaining", header_value(0));
            response
        }
    }
}

fn header_value(n: u32) -> HeaderValue {
    HeaderValue::from_str(&n.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("0"))
}
