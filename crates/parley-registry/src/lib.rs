// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Agent registry and token-indexed authentication.
//!
//! The registry holds an immutable snapshot of all known agents, indexed by
//! bearer token and username. Refreshes build a complete new snapshot and
//! swap it in one write, so readers never observe a partial index. Token
//! validity may change between any two calls; callers must not cache an
//! [`authenticate`](AgentRegistry::authenticate) result past a single
//! request.

pub mod source;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use parley_core::{Agent, AgentStatus, ConnectionType, DeliveryMode, ParleyError};
use parley_metrics::GatewayMetrics;

pub use source::ConfigSource;

/// One immutable agent snapshot with its lookup indices.
#[derive(Debug, Default)]
struct Snapshot {
    agents: Vec<Agent>,
    by_token: HashMap<String, usize>,
    by_username: HashMap<String, usize>,
}

impl Snapshot {
    fn build(agents: Vec<Agent>) -> Self {
        let mut by_token = HashMap::with_capacity(agents.len());
        let mut by_username = HashMap::with_capacity(agents.len());
        for (idx, agent) in agents.iter().enumerate() {
            by_token.insert(agent.token.clone(), idx);
            by_username.insert(agent.username.clone(), idx);
        }
        Self {
            agents,
            by_token,
            by_username,
        }
    }
}

/// Registry of agents with O(1) bearer-token authentication.
pub struct AgentRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
    source: ConfigSource,
    metrics: Arc<GatewayMetrics>,
    consecutive_failures: AtomicU32,
}

impl AgentRegistry {
    /// Bootstrap the registry. Fails fast when neither the endpoint nor the
    /// bootstrap file yields a snapshot.
    pub async fn bootstrap(
        source: ConfigSource,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self, ParleyError> {
        let agents = source.bootstrap().await?;
        info!(agents = agents.len(), "agent registry loaded");
        let registry = Self {
            snapshot: RwLock::new(Arc::new(Snapshot::build(agents))),
            source,
            metrics,
            consecutive_failures: AtomicU32::new(0),
        };
        registry.publish_transport_gauge();
        Ok(registry)
    }

    /// Authenticate a bearer token, returning the agent when the token is
    /// current and the agent is active.
    ///
    /// The result is only valid for the request in hand: the token may be
    /// rotated or revoked by the next refresh.
    pub fn authenticate(&self, bearer: &str) -> Option<Agent> {
        let snapshot = self.current();
        let agent = snapshot
            .by_token
            .get(bearer)
            .map(|&idx| &snapshot.agents[idx])?;
        if agent.status != AgentStatus::Active {
            return None;
        }
        Some(agent.clone())
    }

    /// All agents in the current snapshot.
    pub fn agents(&self) -> Vec<Agent> {
        self.current().agents.clone()
    }

    /// Active agents configured for webhook delivery with a URL present.
    pub fn webhook_agents(&self) -> Vec<Agent> {
        self.current()
            .agents
            .iter()
            .filter(|a| {
                a.status == AgentStatus::Active
                    && a.delivery == DeliveryMode::Webhook
                    && a.webhook_url.is_some()
            })
            .cloned()
            .collect()
    }

    /// Look up an agent by username.
    pub fn by_username(&self, username: &str) -> Option<Agent> {
        let snapshot = self.current();
        snapshot
            .by_username
            .get(username)
            .map(|&idx| snapshot.agents[idx].clone())
    }

    /// Refresh the snapshot from the configured source.
    ///
    /// On failure the prior snapshot stays in place.
    pub async fn refresh(&self) -> Result<(), ParleyError> {
        match self.source.fetch().await {
            Ok(agents) => {
                let next = Arc::new(Snapshot::build(agents));
                if let Ok(mut guard) = self.snapshot.write() {
                    *guard = next;
                }
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.publish_transport_gauge();
                Ok(())
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                self.metrics.registry_refresh_failure();
                warn!(
                    error = %e,
                    consecutive_failures = failures,
                    "registry refresh failed, keeping prior snapshot"
                );
                Err(e)
            }
        }
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn publish_transport_gauge(&self) {
        let snapshot = self.current();
        let mut counts: HashMap<String, u64> = HashMap::new();
        for agent in &snapshot.agents {
            let key = match agent.connection {
                ConnectionType::Socket => "socket",
                ConnectionType::Webhook => "webhook",
                ConnectionType::Both => "both",
            };
            *counts.entry(key.to_string()).or_default() += 1;
        }
        self.metrics.set_agents_by_transport(counts);
    }
}

/// Spawn the periodic refresh task.
pub fn spawn_refresh_task(
    registry: Arc<AgentRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // bootstrap already loaded the first snapshot
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = registry.refresh().await;
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}
