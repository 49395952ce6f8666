// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resumable event log backing stream replay.
//!
//! Each fanout to a stream allocates a strictly increasing event id and
//! persists the serialized payload here before the write to the peer.
//! Entries are kept in memory for 24 hours; only the id allocator is
//! durable. Ids are checkpointed in blocks: the checkpoint file always
//! stores a ceiling the process has not yet issued, so a restart resumes
//! above every id ever handed out, at the cost of a gap. If multiple
//! gateways are ever deployed the allocator must move to a shared counter.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// How long replayable entries are retained.
pub const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Ids are reserved from the checkpoint file in blocks of this size.
const CHECKPOINT_STRIDE: u64 = 1_000;

/// One replayable entry.
#[derive(Debug, Clone)]
pub struct EventLogEntry {
    pub event_id: u64,
    pub room_id: String,
    /// Serialized room-message payload, replayed verbatim.
    pub payload: String,
    expires_at: Instant,
}

/// Append-only in-memory log with a durable id allocator.
pub struct EventLog {
    entries: Mutex<VecDeque<EventLogEntry>>,
    next_id: AtomicU64,
    /// Highest id the checkpoint file covers; must stay ahead of `next_id`.
    reserved_until: AtomicU64,
    checkpoint_path: PathBuf,
    retention: Duration,
}

impl EventLog {
    /// Open the log, resuming the id allocator above the stored checkpoint.
    pub async fn open(checkpoint_path: PathBuf) -> Self {
        Self::open_with_retention(checkpoint_path, RETENTION).await
    }

    /// Retention-parameterized constructor, used by tests.
    pub async fn open_with_retention(checkpoint_path: PathBuf, retention: Duration) -> Self {
        let floor = match tokio::fs::read_to_string(&checkpoint_path).await {
            Ok(body) => body.trim().parse::<u64>().unwrap_or(0),
            Err(_) => 0,
        };
        let log = Self {
            entries: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(floor),
            reserved_until: AtomicU64::new(floor),
            checkpoint_path,
            retention,
        };
        log.reserve_block(floor + CHECKPOINT_STRIDE).await;
        log
    }

    /// Append a payload, returning its freshly allocated event id.
    pub async fn append(&self, room_id: &str, payload: String) -> u64 {
        let event_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        // Top up the reservation before the allocator can catch the ceiling.
        if event_id + CHECKPOINT_STRIDE / 2 > self.reserved_until.load(Ordering::SeqCst) {
            self.reserve_block(event_id + CHECKPOINT_STRIDE).await;
        }

        let entry = EventLogEntry {
            event_id,
            room_id: room_id.to_string(),
            payload,
            expires_at: Instant::now() + self.retention,
        };
        if let Ok(mut entries) = self.entries.lock() {
            prune_expired(&mut entries);
            entries.push_back(entry);
        }
        event_id
    }

    /// Entries with id strictly greater than `after_id`, ascending, across
    /// all rooms. Expired entries are never returned.
    pub fn since(&self, after_id: u64) -> Vec<EventLogEntry> {
        let Ok(mut entries) = self.entries.lock() else {
            return Vec::new();
        };
        prune_expired(&mut entries);
        entries
            .iter()
            .filter(|e| e.event_id > after_id)
            .cloned()
            .collect()
    }

    /// The most recently issued event id.
    pub fn last_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    async fn reserve_block(&self, ceiling: u64) {
        if ceiling <= self.reserved_until.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = tokio::fs::write(&self.checkpoint_path, ceiling.to_string()).await {
            warn!(error = %e, "event-id checkpoint write failed");
            return;
        }
        self.reserved_until.fetch_max(ceiling, Ordering::SeqCst);
    }
}

fn prune_expired(entries: &mut VecDeque<EventLogEntry>) {
    let now = Instant::now();
    while entries
        .front()
        .map(|e| e.expires_at <= now)
        .unwrap_or(false)
    {
        entries.pop_front();
    }
}
