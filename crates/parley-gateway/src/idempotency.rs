// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Idempotency cache for agent sends.
//!
//! A successful send with an idempotency key caches its response body for
//! one hour; a retry with the same (principal, key) returns the identical
//! body without touching the upstream.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// How long cached results are honored.
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct CachedResult {
    body: String,
    stored_at: Instant,
}

/// (principal id, idempotency key) -> cached response body.
#[derive(Debug, Default)]
pub struct IdempotencyCache {
    entries: DashMap<(String, String), CachedResult>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: IDEMPOTENCY_TTL,
        }
    }

    /// TTL-parameterized constructor, used by tests.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached body for a replayed request, if the entry is still live.
    pub fn get(&self, principal_id: &str, key: &str) -> Option<String> {
        let map_key = (principal_id.to_string(), key.to_string());
        let entry = self.entries.get(&map_key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            drop(entry);
            self.entries.remove(&map_key);
            return None;
        }
        Some(entry.body.clone())
    }

    /// Store a successful response body, and opportunistically drop any
    /// expired entries so the map does not grow without bound.
    pub fn put(&self, principal_id: &str, key: &str, body: String) {
        self.entries.retain(|_, v| v.stored_at.elapsed() < self.ttl);
        self.entries.insert(
            (principal_id.to_string(), key.to_string()),
            CachedResult {
                body,
                stored_at: Instant::now(),
            },
        );
    }
}
