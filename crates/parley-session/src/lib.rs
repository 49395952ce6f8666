// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Downstream session state for the Parley gateway.
//!
//! Holds the live state the router consults when picking a transport: the
//! socket hub (one full-duplex session per principal), the stream hub (up to
//! two event streams per principal), the resumable event log backing stream
//! replay, and the durable read tracker.

pub mod event_log;
pub mod protocol;
pub mod read_tracker;
pub mod socket;
pub mod stream;

pub use event_log::{EventLog, EventLogEntry};
pub use protocol::{
    AgentSummary, ClientFrame, RoomMessage, ServerFrame, CLOSE_AUTH_FAILED, CLOSE_AUTH_TIMEOUT,
    CLOSE_GOING_AWAY, CLOSE_REPLACED,
};
pub use read_tracker::ReadTracker;
pub use socket::{SocketCommand, SocketHandle, SocketHub};
pub use stream::{StreamEvent, StreamHandle, StreamHub, StreamRegisterError};
