// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Socket hub: the principal-id -> live socket session map.
//!
//! Invariant: at most one socket session per principal. A newly
//! authenticated socket replaces the prior one; the displaced session is
//! told why and closed with code 4000. The swap happens inside the map
//! entry; the close of the displaced peer is performed by the caller after
//! the lock is gone.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::ServerFrame;

/// Commands consumed by a socket connection's writer task.
#[derive(Debug)]
pub enum SocketCommand {
    Frame(ServerFrame),
    Close { code: u16, reason: String },
}

/// Handle onto one authenticated socket session.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    /// Unique per TCP connection, so stale cleanups can't evict a successor.
    pub conn_id: String,
    pub username: String,
    /// Bearer token presented at auth time. Used to detect tokens revoked
    /// while their session is still live.
    pub token: String,
    pub tx: mpsc::Sender<SocketCommand>,
}

impl SocketHandle {
    /// Best-effort enqueue of a frame; a full or closed channel means the
    /// writer task is gone and the session will be reaped by its own path.
    pub fn send_frame(&self, frame: ServerFrame) -> bool {
        self.tx.try_send(SocketCommand::Frame(frame)).is_ok()
    }

    /// Best-effort close request.
    pub fn send_close(&self, code: u16, reason: &str) {
        let _ = self.tx.try_send(SocketCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Map of principal id -> live socket session.
#[derive(Debug, Default)]
pub struct SocketHub {
    sessions: DashMap<String, SocketHandle>,
}

impl SocketHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new authenticated session, returning the displaced prior
    /// session if there was one. The caller closes the prior session
    /// outside the map lock.
    pub fn install(&self, principal_id: &str, handle: SocketHandle) -> Option<SocketHandle> {
        let prior = self.sessions.insert(principal_id.to_string(), handle);
        if prior.is_some() {
            debug!(principal_id, "socket session replaced");
        }
        prior
    }

    /// Remove the session for a principal, but only when it is still the
    /// same connection. Prevents a closing session's cleanup from evicting
    /// its replacement.
    pub fn remove_if_current(&self, principal_id: &str, conn_id: &str) -> bool {
        self.sessions
            .remove_if(principal_id, |_, handle| handle.conn_id == conn_id)
            .is_some()
    }

    /// Live session for a principal, if any.
    pub fn get(&self, principal_id: &str) -> Option<SocketHandle> {
        self.sessions.get(principal_id).map(|h| h.clone())
    }

    pub fn is_connected(&self, principal_id: &str) -> bool {
        self.sessions.contains_key(principal_id)
    }

    /// Usernames of currently connected principals, for `/health`.
    pub fn connected_usernames(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.username.clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether any live session authenticated with this bearer token.
    pub fn has_session_with_token(&self, token: &str) -> bool {
        self.sessions.iter().any(|e| e.token == token)
    }

    /// Drain every session, handing back the handles so the caller can send
    /// shutdown closes.
    pub fn drain(&self) -> Vec<SocketHandle> {
        let handles: Vec<SocketHandle> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        self.sessions.clear();
        handles
    }
}
