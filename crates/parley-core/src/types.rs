// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared across the Parley workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Trust level controlling whether an agent may receive AI-authored traffic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrustLevel {
    /// Receives only human-authored messages.
    Standard,
    /// Receives AI-authored messages, subject to the loop guard.
    Elevated,
}

/// Which room messages an agent wants delivered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReceiveMode {
    /// Only messages that mention the agent directly.
    Mentions,
    /// Every room message the agent is permitted to see.
    All,
}

/// How the agent connects to the gateway.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionType {
    Socket,
    Webhook,
    Both,
}

/// Delivery path used when the agent has no live session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryMode {
    /// Outbound HTTP POST to the agent's configured URL.
    Webhook,
    /// Fire-and-forget injection into a co-located agent runtime.
    LocalInject,
}

/// Lifecycle status of a registered agent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Active,
    Disabled,
}

/// Whether a message was authored by a human or an AI agent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SenderKind {
    Human,
    Ai,
}

/// A registered agent: the principal of authentication and routing.
///
/// Identity is the principal `id`; the bearer `token` is a projection of it
/// and may rotate between registry refreshes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Opaque principal id.
    pub id: String,
    /// Login-style username, also a mention trigger.
    pub username: String,
    /// Display name shown to humans.
    pub name: String,
    /// Display emoji.
    #[serde(default = "default_emoji")]
    pub emoji: String,
    /// Mention trigger token (matched as `@<mention_key>`).
    pub mention_key: String,
    pub trust: TrustLevel,
    pub receive: ReceiveMode,
    pub connection: ConnectionType,
    pub delivery: DeliveryMode,
    /// Current bearer token. Exactly one per agent.
    pub token: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    pub status: AgentStatus,
}

fn default_emoji() -> String {
    "\u{1f916}".to_string()
}

impl Agent {
    /// Case-insensitive mention check: `@<mention_key>` or `@<username>`
    /// anywhere in the content.
    pub fn is_mentioned_in(&self, content: &str) -> bool {
        let lowered = content.to_lowercase();
        lowered.contains(&format!("@{}", self.mention_key.to_lowercase()))
            || lowered.contains(&format!("@{}", self.username.to_lowercase()))
    }

    /// Whether this agent is the sender of the given message, by principal id
    /// or by username.
    pub fn is_sender_of(&self, msg: &InboundMessage) -> bool {
        self.id == msg.sender_id || self.username == msg.sender
    }
}

/// A chat room visible to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
}

/// Normalized inbound room message received from the upstream chat server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Upstream message id. Consumers key idempotency on this, not on
    /// downstream event ids.
    pub id: String,
    pub room_id: String,
    pub room_name: String,
    /// Sender username.
    pub sender: String,
    /// Sender principal id.
    pub sender_id: String,
    /// Sender display name, when the upstream provides one.
    #[serde(default)]
    pub sender_display_name: Option<String>,
    pub sender_kind: SenderKind,
    pub content: String,
    /// RFC 3339 timestamp from the upstream.
    pub timestamp: String,
}

/// An agent-originated message bound for the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub room_id: String,
    pub content: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Result of a successful upstream send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Server-assigned message id.
    pub message_id: String,
}

/// A session credential acquired from the upstream on behalf of a principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionCredential {
    /// True when the credential is still valid after applying the skew buffer.
    pub fn is_fresh(&self, skew: chrono::Duration) -> bool {
        Utc::now() + skew < self.expires_at
    }
}

/// One entry of unread context attached to a mention delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub sender: String,
    #[serde(rename = "senderType")]
    pub sender_kind: SenderKind,
    pub content: String,
    pub timestamp: String,
}

impl From<&InboundMessage> for ContextEntry {
    fn from(msg: &InboundMessage) -> Self {
        Self {
            sender: msg.sender.clone(),
            sender_kind: msg.sender_kind,
            content: msg.content.clone(),
            timestamp: msg.timestamp.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(mention_key: &str, username: &str) -> Agent {
        Agent {
            id: "agent-1".into(),
            username: username.into(),
            name: "Test Agent".into(),
            emoji: default_emoji(),
            mention_key: mention_key.into(),
            trust: TrustLevel::Standard,
            receive: ReceiveMode::Mentions,
            connection: ConnectionType::Socket,
            delivery: DeliveryMode::Webhook,
            token: "byoa_test".into(),
            webhook_url: None,
            webhook_secret: None,
            status: AgentStatus::Active,
        }
    }

    #[test]
    fn mention_matches_mention_key_case_insensitive() {
        let a = agent("bob", "bob-agent");
        assert!(a.is_mentioned_in("hey @Bob, status?"));
        assert!(a.is_mentioned_in("@BOB"));
        assert!(!a.is_mentioned_in("hey bob"));
    }

    #[test]
    fn mention_matches_username() {
        let a = agent("bob", "bob-agent");
        assert!(a.is_mentioned_in("ping @bob-agent please"));
    }

    #[test]
    fn sender_matches_by_id_or_username() {
        let a = agent("bob", "bob-agent");
        let msg = InboundMessage {
            id: "m1".into(),
            room_id: "r1".into(),
            room_name: "general".into(),
            sender: "bob-agent".into(),
            sender_id: "someone-else".into(),
            sender_display_name: None,
            sender_kind: SenderKind::Ai,
            content: "hi".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        assert!(a.is_sender_of(&msg));
    }

    #[test]
    fn trust_level_round_trips_through_strum() {
        use std::str::FromStr;
        assert_eq!(TrustLevel::Elevated.to_string(), "elevated");
        assert_eq!(
            TrustLevel::from_str("standard").unwrap(),
            TrustLevel::Standard
        );
    }

    #[test]
    fn credential_freshness_applies_skew() {
        let cred = SessionCredential {
            token: "t".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert!(cred.is_fresh(chrono::Duration::seconds(0)));
        assert!(!cred.is_fresh(chrono::Duration::seconds(60)));
    }

    #[test]
    fn agent_deserializes_with_defaults() {
        let json = r#"{
            "id": "a-1",
            "username": "scout",
            "name": "Scout",
            "mention_key": "scout",
            "trust": "elevated",
            "receive": "all",
            "connection": "both",
            "delivery": "local_inject",
            "token": "byoa_abc",
            "status": "active"
        }"#;
        let a: Agent = serde_json::from_str(json).unwrap();
        assert_eq!(a.trust, TrustLevel::Elevated);
        assert_eq!(a.delivery, DeliveryMode::LocalInject);
        assert!(a.webhook_url.is_none());
        assert!(!a.emoji.is_empty());
    }

    #[test]
    fn context_entry_serializes_sender_type_camel() {
        let entry = ContextEntry {
            sender: "alice".into(),
            sender_kind: SenderKind::Human,
            content: "hi".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"senderType\":\"human\""), "got: {json}");
    }
}
