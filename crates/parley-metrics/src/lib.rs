// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway counters with a periodic durable snapshot.
//!
//! Counters are plain atomics so the live values can be read back for the
//! structured `/metrics/json` endpoint and for the human `/metrics` report.
//! A background task appends a snapshot to a JSON-lines file every 60 s and
//! once more at shutdown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default interval between durable snapshot flushes.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Live counters for the gateway.
///
/// Cheap to share: one `Arc<GatewayMetrics>` is threaded through every
/// component that reports.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Currently open downstream sessions (sockets + streams).
    active_connections: AtomicI64,
    /// Downstream sessions accepted since startup.
    total_connections: AtomicU64,
    /// Downstream sessions that ended, for any reason.
    disconnects: AtomicU64,
    /// Failed authentication attempts across all surfaces.
    auth_failures: AtomicU64,
    /// A still-connected session's token would be rejected by a fresh auth.
    revoked_while_connected: AtomicU64,
    /// Messages forwarded upstream on behalf of agents.
    messages_sent: AtomicU64,
    /// Deliveries abandoned after webhook retry exhaustion.
    messages_lost: AtomicU64,
    /// Individual webhook retry attempts.
    message_retries: AtomicU64,
    /// Registry refreshes that failed and kept the prior snapshot.
    registry_refresh_failures: AtomicU64,
    /// Registered agents per connection type, rebuilt on registry refresh.
    agents_by_transport: RwLock<HashMap<String, u64>>,
}

/// A point-in-time copy of every counter, as flushed to disk and served
/// from `/metrics/json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub active_connections: i64,
    pub total_connections: u64,
    pub disconnects: u64,
    pub auth_failures: u64,
    pub revoked_while_connected: u64,
    pub messages_sent: u64,
    pub messages_lost: u64,
    pub message_retries: u64,
    pub registry_refresh_failures: u64,
    pub agents_by_transport: HashMap<String, u64>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn revoked_while_connected(&self) {
        self.revoked_while_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// One lost delivery, after retries are exhausted.
    pub fn message_lost(&self, agent: &str, room: &str) {
        self.messages_lost.fetch_add(1, Ordering::Relaxed);
        warn!(agent, room, "message lost after webhook retries exhausted");
    }

    pub fn message_retry(&self) {
        self.message_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registry_refresh_failure(&self) {
        self.registry_refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Replace the agents-by-transport gauge. Called on registry refresh.
    pub fn set_agents_by_transport(&self, counts: HashMap<String, u64>) {
        if let Ok(mut guard) = self.agents_by_transport.write() {
            *guard = counts;
        }
    }

    /// Capture every counter at this instant.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            revoked_while_connected: self.revoked_while_connected.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_lost: self.messages_lost.load(Ordering::Relaxed),
            message_retries: self.message_retries.load(Ordering::Relaxed),
            registry_refresh_failures: self.registry_refresh_failures.load(Ordering::Relaxed),
            agents_by_transport: self
                .agents_by_transport
                .read()
                .map(|g| g.clone())
                .unwrap_or_default(),
        }
    }

    /// Human-readable report served from `/metrics`.
    pub fn render_text(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();
        out.push_str(&format!("parley gateway metrics @ {}\n\n", snap.timestamp));
        out.push_str(&format!("active_connections        {}\n", snap.active_connections));
        out.push_str(&format!("total_connections         {}\n", snap.total_connections));
        out.push_str(&format!("disconnects               {}\n", snap.disconnects));
        out.push_str(&format!("auth_failures             {}\n", snap.auth_failures));
        out.push_str(&format!("revoked_while_connected   {}\n", snap.revoked_while_connected));
        out.push_str(&format!("messages_sent             {}\n", snap.messages_sent));
        out.push_str(&format!("messages_lost             {}\n", snap.messages_lost));
        out.push_str(&format!("message_retries           {}\n", snap.message_retries));
        out.push_str(&format!("registry_refresh_failures {}\n", snap.registry_refresh_failures));
        let mut transports: Vec<_> = snap.agents_by_transport.iter().collect();
        transports.sort();
        for (transport, count) in transports {
            out.push_str(&format!("agents[{transport}]            {count}\n"));
        }
        out
    }

    /// Append one snapshot line to the JSON-lines log.
    pub async fn flush_to(&self, path: &Path) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let line = serde_json::to_string(&self.snapshot())
            .map_err(std::io::Error::other)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

/// Spawn the periodic flush task. Flushes every [`FLUSH_INTERVAL`] and once
/// more when the cancellation token fires.
pub fn spawn_flush_task(
    metrics: Arc<GatewayMetrics>,
    path: PathBuf,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FLUSH_INTERVAL);
        // The immediate first tick would duplicate the startup state.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = metrics.flush_to(&path).await {
                        warn!(error = %e, path = %path.display(), "metrics flush failed");
                    } else {
                        debug!("metrics snapshot flushed");
                    }
                }
                _ = cancel.cancelled() => {
                    if let Err(e) = metrics.flush_to(&path).await {
                        warn!(error = %e, "final metrics flush failed");
                    }
                    break;
                }
            }
        }
    })
}
