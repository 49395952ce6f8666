// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upstream wire shapes and normalization into [`InboundMessage`].

use serde::Deserialize;

use parley_core::{InboundMessage, SenderKind};

/// A room message as the upstream serializes it, on both the live feed and
/// the history endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub id: String,
    pub room_id: String,
    #[serde(default)]
    pub room_name: String,
    pub sender: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_display_name: Option<String>,
    /// "human" or "ai"; anything unrecognized is treated as AI out of caution.
    #[serde(default)]
    pub sender_type: Option<String>,
    pub content: String,
    pub timestamp: String,
}

impl WireMessage {
    pub fn normalize(self) -> InboundMessage {
        let sender_kind = match self.sender_type.as_deref() {
            Some("human") => SenderKind::Human,
            _ => SenderKind::Ai,
        };
        InboundMessage {
            id: self.id,
            room_id: self.room_id,
            room_name: self.room_name,
            sender: self.sender,
            sender_id: self.sender_id,
            sender_display_name: self.sender_display_name,
            sender_kind,
            content: self.content,
            timestamp: self.timestamp,
        }
    }
}

/// Events arriving on the live feed socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Message(WireMessage),
    /// Keep-alive from the upstream; carries no payload we use.
    Ping,
    #[serde(other)]
    Unknown,
}
