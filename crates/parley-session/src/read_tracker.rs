// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable per-(principal, room) last-seen cursors.
//!
//! Cursors advance only when a mention is delivered to the owning agent and
//! are used to materialize unread context on the next mention. The whole
//! map is one JSON document rewritten on each update; volumes are small and
//! writes are serialized by the mutex.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

/// One cursor value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub last_seen: String,
    /// Unix epoch seconds of the last advance.
    pub updated_at: i64,
}

/// principal id -> room id -> cursor.
type CursorMap = HashMap<String, HashMap<String, Cursor>>;

/// File-backed read tracker.
pub struct ReadTracker {
    path: PathBuf,
    cursors: Mutex<CursorMap>,
}

impl ReadTracker {
    /// Load the tracker. A missing file is an empty tracker.
    pub async fn load(path: PathBuf) -> Self {
        let cursors = match tokio::fs::read_to_string(&path).await {
            Ok(body) => match serde_json::from_str::<CursorMap>(&body) {
                Ok(map) => map,
                Err(e) => {
                    warn!(error = %e, "read tracker file unreadable, starting empty");
                    CursorMap::new()
                }
            },
            Err(_) => CursorMap::new(),
        };
        Self {
            path,
            cursors: Mutex::new(cursors),
        }
    }

    /// Last-seen message id for (principal, room), if any.
    pub async fn get(&self, principal_id: &str, room_id: &str) -> Option<String> {
        self.cursors
            .lock()
            .await
            .get(principal_id)
            .and_then(|rooms| rooms.get(room_id))
            .map(|c| c.last_seen.clone())
    }

    /// Advance the cursor and rewrite the backing file.
    pub async fn advance(&self, principal_id: &str, room_id: &str, message_id: &str) {
        let mut cursors = self.cursors.lock().await;
        cursors
            .entry(principal_id.to_string())
            .or_default()
            .insert(
                room_id.to_string(),
                Cursor {
                    last_seen: message_id.to_string(),
                    updated_at: epoch_secs(),
                },
            );

        match serde_json::to_string_pretty(&*cursors) {
            Ok(body) => {
                if let Err(e) = tokio::fs::write(&self.path, body).await {
                    warn!(error = %e, "read tracker write failed");
                }
            }
            Err(e) => warn!(error = %e, "read tracker serialization failed"),
        }
    }
}

fn epoch_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
