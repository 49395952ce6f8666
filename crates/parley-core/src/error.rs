// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley agent gateway.

use thiserror::Error;

/// The primary error type used across all Parley crates.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Configuration errors (invalid TOML, missing required fields).
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication failure (missing bearer, unknown token, inactive agent).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Caller-supplied input was rejected (missing fields, oversized content).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Per-principal rate limit exceeded.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The upstream bridge has no live session.
    #[error("upstream bridge unavailable")]
    BridgeUnavailable,

    /// The upstream chat server rejected or failed a send.
    #[error("upstream send failed: {message}")]
    UpstreamSend {
        status: Option<u16>,
        message: String,
    },

    /// Transport-level HTTP failure (connect error, body read, bad JSON).
    #[error("http error: {message}")]
    Http {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// On-disk state errors (credential cache, read tracker, metrics log).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Short machine-readable code surfaced on socket `error` frames and
    /// stream `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            ParleyError::Config(_) => "CONFIG",
            ParleyError::Auth(_) => "AUTH_FAILED",
            ParleyError::InvalidInput(_) => "INVALID_INPUT",
            ParleyError::RateLimited { .. } => "RATE_LIMITED",
            ParleyError::BridgeUnavailable => "BRIDGE_UNAVAILABLE",
            ParleyError::UpstreamSend { .. } => "SEND_FAILED",
            ParleyError::Http { .. } => "HTTP_ERROR",
            ParleyError::Storage { .. } => "STORAGE_ERROR",
            ParleyError::Timeout { .. } => "TIMEOUT",
            ParleyError::Internal(_) => "INTERNAL",
        }
    }
}
