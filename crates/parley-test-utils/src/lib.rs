// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared mocks and builders for Parley tests.
//!
//! [`MockBridge`] records every upstream call and serves canned history so
//! routing behavior can be asserted without a chat server. [`agent`] builds
//! a fully populated [`Agent`] that tests then tweak field by field.

pub mod mock_bridge;

pub use mock_bridge::MockBridge;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::{
    Agent, AgentStatus, ConnectionType, ContextEntry, DeliveryMode, InboundMessage, InjectSink,
    ReceiveMode, SenderKind, TrustLevel,
};
use parley_metrics::GatewayMetrics;
use parley_registry::{AgentRegistry, ConfigSource};

/// A minimal active agent; tests override the fields they care about.
pub fn agent(id: &str) -> Agent {
    Agent {
        id: id.to_string(),
        username: id.to_string(),
        name: id.to_uppercase(),
        emoji: "\u{1f916}".into(),
        mention_key: id.to_string(),
        trust: TrustLevel::Standard,
        receive: ReceiveMode::All,
        connection: ConnectionType::Both,
        delivery: DeliveryMode::Webhook,
        token: format!("byoa_{id}"),
        webhook_url: None,
        webhook_secret: None,
        status: AgentStatus::Active,
    }
}

/// A human-authored room message.
pub fn human_message(id: &str, room: &str, sender: &str, content: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        room_id: room.to_string(),
        room_name: format!("{room}-name"),
        sender: sender.to_string(),
        sender_id: format!("u-{sender}"),
        sender_display_name: None,
        sender_kind: SenderKind::Human,
        content: content.to_string(),
        timestamp: "2026-03-01T10:00:00Z".to_string(),
    }
}

/// An AI-authored room message sent by the given agent principal.
pub fn ai_message(id: &str, room: &str, sender: &Agent, content: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        room_id: room.to_string(),
        room_name: format!("{room}-name"),
        sender: sender.username.clone(),
        sender_id: sender.id.clone(),
        sender_display_name: Some(sender.name.clone()),
        sender_kind: SenderKind::Ai,
        content: content.to_string(),
        timestamp: "2026-03-01T10:00:00Z".to_string(),
    }
}

/// Registry bootstrapped from an in-memory agent list (file-backed under a
/// leaked tempdir so refresh keeps working for the test's lifetime).
pub async fn registry_with(
    agents: Vec<Agent>,
    metrics: Arc<GatewayMetrics>,
) -> Arc<AgentRegistry> {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("agents.json");
    tokio::fs::write(&file, serde_json::to_string(&agents).expect("serialize agents"))
        .await
        .expect("write agents file");
    std::mem::forget(dir);
    let source = ConfigSource::new(None, None, Some(file)).expect("config source");
    Arc::new(
        AgentRegistry::bootstrap(source, metrics)
            .await
            .expect("bootstrap registry"),
    )
}

/// One recorded local injection.
#[derive(Debug, Clone)]
pub struct RecordedInjection {
    pub agent_id: String,
    pub message_id: String,
    pub context_len: usize,
}

/// An [`InjectSink`] that records every injection for assertions.
#[derive(Default)]
pub struct RecordingInject {
    pub injections: Mutex<Vec<RecordedInjection>>,
}

impl RecordingInject {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn recorded(&self) -> Vec<RecordedInjection> {
        self.injections.lock().await.clone()
    }
}

#[async_trait]
impl InjectSink for RecordingInject {
    async fn inject(&self, agent: &Agent, message: &InboundMessage, context: &[ContextEntry]) {
        self.injections.lock().await.push(RecordedInjection {
            agent_id: agent.id.clone(),
            message_id: message.id.clone(),
            context_len: context.len(),
        });
    }
}
