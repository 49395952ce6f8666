// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON wire frames for persistent-socket sessions, and the room-message
//! payload shared with the event-stream surface.

use serde::{Deserialize, Serialize};

use parley_core::{Agent, InboundMessage, Room, SenderKind};

/// Close code sent to a session displaced by a newer authentication.
pub const CLOSE_REPLACED: u16 = 4000;
/// Close code for sessions that never authenticated within the deadline.
pub const CLOSE_AUTH_TIMEOUT: u16 = 4001;
/// Close code for failed authentication.
pub const CLOSE_AUTH_FAILED: u16 = 4003;
/// Standard going-away code used at graceful shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Frames a socket client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String },
    Message { room: String, content: String },
    Pong,
}

/// Agent identity carried on the `auth_ok` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub username: String,
    pub name: String,
    pub emoji: String,
}

impl From<&Agent> for AgentSummary {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            username: agent.username.clone(),
            name: agent.name.clone(),
            emoji: agent.emoji.clone(),
        }
    }
}

/// A room message as delivered downstream, on socket frames and as the
/// `data` payload of stream `message` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub id: String,
    pub room: String,
    pub room_name: String,
    pub sender: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
    pub sender_type: SenderKind,
    pub content: String,
    pub timestamp: String,
}

impl From<&InboundMessage> for RoomMessage {
    fn from(msg: &InboundMessage) -> Self {
        Self {
            id: msg.id.clone(),
            room: msg.room_id.clone(),
            room_name: msg.room_name.clone(),
            sender: msg.sender.clone(),
            sender_display_name: msg.sender_display_name.clone(),
            sender_type: msg.sender_kind,
            content: msg.content.clone(),
            timestamp: msg.timestamp.clone(),
        }
    }
}

/// Frames the server sends to socket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk {
        agent: AgentSummary,
        rooms: Vec<Room>,
    },
    AuthError {
        error: String,
    },
    Message(RoomMessage),
    MessageSent {
        room: String,
    },
    Error {
        code: String,
        message: String,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_auth_frame_parses() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"auth","token":"byoa_x"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Auth { token } if token == "byoa_x"));
    }

    #[test]
    fn client_message_frame_parses() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"message","room":"r-1","content":"hi"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Message { .. }));
    }

    #[test]
    fn unknown_client_frame_is_an_error() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn server_frames_tag_with_type() {
        let frame = ServerFrame::MessageSent { room: "r-1".into() };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"message_sent""#), "got: {json}");

        let ping = serde_json::to_string(&ServerFrame::Ping).unwrap();
        assert_eq!(ping, r#"{"type":"ping"}"#);
    }

    #[test]
    fn room_message_serializes_camel_case() {
        let msg = InboundMessage {
            id: "msg-1".into(),
            room_id: "r-1".into(),
            room_name: "general".into(),
            sender: "alice".into(),
            sender_id: "u-1".into(),
            sender_display_name: Some("Alice".into()),
            sender_kind: SenderKind::Human,
            content: "hello".into(),
            timestamp: "2026-03-01T10:00:00Z".into(),
        };
        let json = serde_json::to_string(&RoomMessage::from(&msg)).unwrap();
        assert!(json.contains(r#""roomName":"general""#), "got: {json}");
        assert!(json.contains(r#""senderType":"human""#));
        assert!(json.contains(r#""senderDisplayName":"Alice""#));
    }

    #[test]
    fn room_message_omits_missing_display_name() {
        let msg = InboundMessage {
            id: "msg-1".into(),
            room_id: "r-1".into(),
            room_name: "general".into(),
            sender: "bot".into(),
            sender_id: "u-2".into(),
            sender_display_name: None,
            sender_kind: SenderKind::Ai,
            content: "hi".into(),
            timestamp: "t".into(),
        };
        let json = serde_json::to_string(&RoomMessage::from(&msg)).unwrap();
        assert!(!json.contains("senderDisplayName"));
    }
}
