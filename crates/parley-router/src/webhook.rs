// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound webhook dispatch with bounded retry.
//!
//! One POST per delivery. 2xx succeeds, any 4xx is terminal, 5xx and
//! network errors retry on a 1 s / 2 s / 4 s backoff for four attempts
//! total. Exhaustion records a single message-lost metric tagged with
//! agent and room. Dispatch runs in its own task and never blocks routing.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use parley_core::{Agent, ContextEntry, InboundMessage, SenderKind};
use parley_metrics::GatewayMetrics;

/// Per-attempt request timeout.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before each attempt; the length fixes the attempt count at four.
const BACKOFF: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Webhook request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub message_id: String,
    pub sender: String,
    pub sender_type: SenderKind,
    pub content: String,
    pub room: String,
    pub timestamp: String,
    pub context: Vec<ContextEntry>,
}

impl WebhookPayload {
    pub fn new(msg: &InboundMessage, context: Vec<ContextEntry>) -> Self {
        Self {
            message_id: msg.id.clone(),
            sender: msg.sender.clone(),
            sender_type: msg.sender_kind,
            content: msg.content.clone(),
            room: msg.room_id.clone(),
            timestamp: msg.timestamp.clone(),
            context,
        }
    }
}

/// Stateless webhook dispatcher shared by all deliveries.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    metrics: Arc<GatewayMetrics>,
    backoff: Vec<Duration>,
}

impl WebhookDispatcher {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            metrics,
            backoff: BACKOFF.to_vec(),
        }
    }

    /// Override the backoff schedule. Attempt count follows the schedule
    /// length; tests use near-zero delays.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Deliver one payload to the agent's webhook. Runs to completion in
    /// the calling task; callers spawn it.
    pub async fn dispatch(&self, agent: &Agent, payload: WebhookPayload) {
        let Some(url) = agent.webhook_url.as_deref() else {
            return;
        };
        let secret = agent.webhook_secret.clone().unwrap_or_default();
        let room = payload.room.clone();

        for (attempt, delay) in self.backoff.iter().enumerate() {
            if attempt > 0 {
                self.metrics.message_retry();
                tokio::time::sleep(*delay).await;
            }

            let result = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .header("X-Gateway-Secret", &secret)
                .header("X-Gateway-Agent", &agent.mention_key)
                .json(&payload)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(agent = %agent.username, attempt, "webhook delivered");
                        return;
                    }
                    if status.is_client_error() {
                        warn!(
                            agent = %agent.username,
                            status = %status,
                            "webhook rejected, not retrying"
                        );
                        self.metrics.message_lost(&agent.username, &room);
                        return;
                    }
                    warn!(
                        agent = %agent.username,
                        status = %status,
                        attempt,
                        "webhook attempt failed"
                    );
                }
                Err(e) => {
                    warn!(
                        agent = %agent.username,
                        error = %e,
                        attempt,
                        "webhook request error"
                    );
                }
            }
        }

        self.metrics.message_lost(&agent.username, &room);
    }
}
