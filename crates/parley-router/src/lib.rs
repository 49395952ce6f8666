// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound message routing.
//!
//! The router is the single consumer of the bridge's inbound queue. For
//! each message it runs every registered agent through the filter pipeline
//! (skip-sender, receive-mode and mention, trust and loop guard), picks one
//! transport per candidate in precedence order (socket, stream,
//! local-inject, webhook-on-mention), and materializes unread context on
//! mentions. Messages are processed strictly in upstream order; the side
//! effects of one candidate run concurrently with the rest of the process.

pub mod loop_guard;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_core::{
    Agent, AgentStatus, ContextEntry, DeliveryMode, InboundMessage, InjectSink, SenderKind,
    UpstreamBridge,
};
use parley_metrics::GatewayMetrics;
use parley_registry::AgentRegistry;
use parley_session::{
    EventLog, ReadTracker, RoomMessage, ServerFrame, SocketHub, StreamEvent, StreamHub,
};

pub use loop_guard::LoopGuard;
pub use webhook::{WebhookDispatcher, WebhookPayload};

/// Unread-context fetch limit per mention.
const CONTEXT_FETCH_LIMIT: usize = 50;

/// Interval of the loop-guard sweep.
const GUARD_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Which transport carried a delivery. Returned for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Socket,
    Stream,
    LocalInject,
    Webhook,
    Skipped,
}

/// An [`InjectSink`] that logs injections. Stands in for the co-located
/// runtime integration, which is wired externally.
#[derive(Debug, Default)]
pub struct LogInject;

#[async_trait]
impl InjectSink for LogInject {
    async fn inject(&self, agent: &Agent, message: &InboundMessage, context: &[ContextEntry]) {
        info!(
            agent = %agent.username,
            message_id = %message.id,
            context = context.len(),
            "local inject"
        );
    }
}

/// The routing engine.
pub struct Router {
    registry: Arc<AgentRegistry>,
    bridge: Arc<dyn UpstreamBridge>,
    sockets: Arc<SocketHub>,
    streams: Arc<StreamHub>,
    event_log: Arc<EventLog>,
    read_tracker: Arc<ReadTracker>,
    loop_guard: LoopGuard,
    webhooks: WebhookDispatcher,
    inject: Arc<dyn InjectSink>,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AgentRegistry>,
        bridge: Arc<dyn UpstreamBridge>,
        sockets: Arc<SocketHub>,
        streams: Arc<StreamHub>,
        event_log: Arc<EventLog>,
        read_tracker: Arc<ReadTracker>,
        metrics: Arc<GatewayMetrics>,
        inject: Arc<dyn InjectSink>,
    ) -> Self {
        Self {
            registry,
            bridge,
            sockets,
            streams,
            event_log,
            read_tracker,
            loop_guard: LoopGuard::new(),
            webhooks: WebhookDispatcher::new(metrics),
            inject,
        }
    }

    /// Swap the webhook dispatcher, used by tests to shrink backoff delays.
    pub fn with_webhook_dispatcher(mut self, webhooks: WebhookDispatcher) -> Self {
        self.webhooks = webhooks;
        self
    }

    /// Consume the inbound queue until it closes or shutdown begins.
    pub async fn run(
        self,
        mut inbound_rx: mpsc::Receiver<InboundMessage>,
        cancel: CancellationToken,
    ) {
        info!("router running");
        let mut sweep = tokio::time::interval(GUARD_SWEEP_INTERVAL);
        sweep.tick().await;
        loop {
            tokio::select! {
                msg = inbound_rx.recv() => {
                    match msg {
                        Some(msg) => self.route_message(msg).await,
                        None => {
                            warn!("inbound queue closed, router stopping");
                            break;
                        }
                    }
                }
                _ = sweep.tick() => self.loop_guard.sweep(),
                _ = cancel.cancelled() => {
                    info!("shutdown signal received, router stopping");
                    break;
                }
            }
        }
    }

    /// Route one inbound message to every eligible candidate.
    pub async fn route_message(&self, msg: InboundMessage) {
        for candidate in self.registry.agents() {
            if candidate.status != AgentStatus::Active {
                continue;
            }
            let delivery = self.route_to_candidate(&candidate, &msg).await;
            if delivery != Delivery::Skipped {
                // A mention-bypassed AI delivery still counts as an
                // exchange: the pair cooldown starts here.
                if msg.sender_kind == SenderKind::Ai
                    && candidate.is_mentioned_in(&msg.content)
                {
                    self.loop_guard.record(&msg.sender_id, &candidate.id);
                }
                debug!(
                    message_id = %msg.id,
                    candidate = %candidate.username,
                    transport = ?delivery,
                    "message routed"
                );
            }
        }
    }

    async fn route_to_candidate(&self, candidate: &Agent, msg: &InboundMessage) -> Delivery {
        // 1. Never echo a message back at its sender.
        if candidate.is_sender_of(msg) {
            return Delivery::Skipped;
        }

        // 2. Receive mode.
        let mentioned = candidate.is_mentioned_in(&msg.content);
        if candidate.receive == parley_core::ReceiveMode::Mentions && !mentioned {
            return Delivery::Skipped;
        }

        // 3. Loop guard, unless the mention makes user intent explicit.
        if !mentioned
            && msg.sender_kind == SenderKind::Ai
            && !self.loop_guard.permit(&msg.sender_id, candidate)
        {
            return Delivery::Skipped;
        }

        // 4. Transport precedence, one transport per candidate.
        let has_socket = self.sockets.is_connected(&candidate.id);
        if has_socket && candidate.delivery != DeliveryMode::LocalInject {
            let delivered = self
                .sockets
                .get(&candidate.id)
                .map(|handle| handle.send_frame(ServerFrame::Message(RoomMessage::from(msg))))
                .unwrap_or(false);
            if delivered && mentioned {
                // The socket carries only the message itself; the agent is
                // expected to catch up on history on its own.
                self.read_tracker
                    .advance(&candidate.id, &msg.room_id, &msg.id)
                    .await;
            }
            return if delivered {
                Delivery::Socket
            } else {
                Delivery::Skipped
            };
        }

        if self.streams.has_stream(&candidate.id) {
            let payload = match serde_json::to_string(&RoomMessage::from(msg)) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "room message serialization failed");
                    return Delivery::Skipped;
                }
            };
            // Persist first so a reconnecting peer can always replay what
            // it was sent.
            let event_id = self.event_log.append(&msg.room_id, payload.clone()).await;
            self.streams.deliver(
                &candidate.id,
                StreamEvent {
                    id: Some(event_id),
                    name: "message",
                    data: payload,
                },
            );
            if mentioned {
                self.read_tracker
                    .advance(&candidate.id, &msg.room_id, &msg.id)
                    .await;
            }
            return Delivery::Stream;
        }

        if candidate.delivery == DeliveryMode::LocalInject {
            let context = if mentioned {
                self.materialize_context(candidate, msg).await
            } else {
                Vec::new()
            };
            if mentioned {
                self.read_tracker
                    .advance(&candidate.id, &msg.room_id, &msg.id)
                    .await;
            }
            let inject = self.inject.clone();
            let agent = candidate.clone();
            let message = msg.clone();
            tokio::spawn(async move {
                inject.inject(&agent, &message, &context).await;
            });
            return Delivery::LocalInject;
        }

        if mentioned && candidate.webhook_url.is_some() {
            let context = self.materialize_context(candidate, msg).await;
            self.read_tracker
                .advance(&candidate.id, &msg.room_id, &msg.id)
                .await;
            let dispatcher = self.webhooks.clone();
            let agent = candidate.clone();
            let payload = WebhookPayload::new(msg, context);
            tokio::spawn(async move {
                dispatcher.dispatch(&agent, payload).await;
            });
            return Delivery::Webhook;
        }

        Delivery::Skipped
    }

    /// Fetch unread history between the candidate's cursor and this message.
    /// The mention itself is excluded; it rides as the main payload.
    async fn materialize_context(
        &self,
        candidate: &Agent,
        msg: &InboundMessage,
    ) -> Vec<ContextEntry> {
        let after = self
            .read_tracker
            .get(&candidate.id, &msg.room_id)
            .await
            .unwrap_or_default();

        match self
            .bridge
            .fetch_since(&candidate.token, &msg.room_id, &after, CONTEXT_FETCH_LIMIT)
            .await
        {
            Ok(history) => history
                .iter()
                .filter(|m| m.id != msg.id)
                .map(ContextEntry::from)
                .collect(),
            Err(e) => {
                warn!(
                    candidate = %candidate.username,
                    error = %e,
                    "context fetch failed, delivering without context"
                );
                Vec::new()
            }
        }
    }
}
