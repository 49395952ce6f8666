// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Downstream surface of the Parley agent gateway.
//!
//! Serves the persistent-socket endpoint, the event-stream endpoint, the
//! per-request send API with rate limiting and idempotency, and the health
//! and metrics pages, all on one axum router.

pub mod auth;
pub mod handlers;
pub mod idempotency;
pub mod rate_limit;
pub mod server;
pub mod sse;
pub mod ws;

pub use server::{start_server, GatewayState, RateSettings};
