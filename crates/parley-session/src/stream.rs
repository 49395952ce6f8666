// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stream hub: per-principal unidirectional event-stream sessions.
//!
//! A principal may hold at most two concurrent streams. Fanout writes the
//! same event (same event id) to every stream the principal has open.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Concurrent stream cap per principal.
pub const MAX_STREAMS_PER_PRINCIPAL: usize = 2;

/// One event bound for a stream peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Present only for replayable events (`message`).
    pub id: Option<u64>,
    pub name: &'static str,
    /// JSON payload for the `data:` line.
    pub data: String,
}

/// Handle onto one open stream session.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub stream_id: String,
    /// The `Last-Event-ID` the peer presented at connect time.
    pub resumed_from: u64,
    pub tx: mpsc::Sender<StreamEvent>,
}

/// Why a stream registration was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamRegisterError {
    TooManyConnections,
}

/// Map of principal id -> open stream sessions.
#[derive(Debug, Default)]
pub struct StreamHub {
    streams: DashMap<String, Vec<StreamHandle>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream, enforcing the per-principal cap.
    pub fn register(
        &self,
        principal_id: &str,
        handle: StreamHandle,
    ) -> Result<(), StreamRegisterError> {
        let mut entry = self.streams.entry(principal_id.to_string()).or_default();
        if entry.len() >= MAX_STREAMS_PER_PRINCIPAL {
            return Err(StreamRegisterError::TooManyConnections);
        }
        entry.push(handle);
        Ok(())
    }

    /// Remove one stream session.
    pub fn deregister(&self, principal_id: &str, stream_id: &str) {
        if let Some(mut entry) = self.streams.get_mut(principal_id) {
            entry.retain(|h| h.stream_id != stream_id);
        }
        self.streams
            .remove_if(principal_id, |_, handles| handles.is_empty());
    }

    /// Write an event to every open stream for the principal. Streams whose
    /// peer is gone are dropped on the spot. Returns how many streams took
    /// the event.
    pub fn deliver(&self, principal_id: &str, event: StreamEvent) -> usize {
        let Some(mut entry) = self.streams.get_mut(principal_id) else {
            return 0;
        };
        let before = entry.len();
        entry.retain(|handle| handle.tx.try_send(event.clone()).is_ok());
        let delivered = entry.len();
        if delivered < before {
            debug!(
                principal_id,
                dropped = before - delivered,
                "pruned dead stream sessions"
            );
        }
        delivered
    }

    pub fn stream_count(&self, principal_id: &str) -> usize {
        self.streams
            .get(principal_id)
            .map(|e| e.len())
            .unwrap_or(0)
    }

    pub fn has_stream(&self, principal_id: &str) -> bool {
        self.stream_count(principal_id) > 0
    }

    /// Hand back every handle and clear the hub. Used at shutdown to emit
    /// `shutdown` events.
    pub fn drain(&self) -> Vec<StreamHandle> {
        let handles: Vec<StreamHandle> = self
            .streams
            .iter()
            .flat_map(|e| e.value().clone())
            .collect();
        self.streams.clear();
        handles
    }
}
