// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recording mock of the upstream bridge.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use parley_core::{
    InboundMessage, ParleyError, Room, SendReceipt, UpstreamBridge,
};

/// One recorded `send_as` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    pub agent_token: String,
    pub room_id: String,
    pub content: String,
}

/// One recorded `fetch_since` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFetch {
    pub agent_token: String,
    pub room_id: String,
    pub after_id: String,
    pub limit: usize,
}

/// An [`UpstreamBridge`] that records calls and serves canned data.
#[derive(Default)]
pub struct MockBridge {
    connected: AtomicBool,
    send_counter: AtomicU64,
    pub sends: Mutex<Vec<RecordedSend>>,
    pub fetches: Mutex<Vec<RecordedFetch>>,
    pub rooms: Mutex<Vec<Room>>,
    /// History returned by `fetch_since`, already filtered by the test.
    pub history: Mutex<Vec<InboundMessage>>,
    /// When set, `send_as` fails with this upstream status.
    pub fail_sends_with: Mutex<Option<u16>>,
}

impl MockBridge {
    pub fn connected() -> Arc<Self> {
        let bridge = Self::default();
        bridge.connected.store(true, Ordering::Relaxed);
        Arc::new(bridge)
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub async fn set_history(&self, messages: Vec<InboundMessage>) {
        *self.history.lock().await = messages;
    }

    pub async fn set_rooms(&self, rooms: Vec<Room>) {
        *self.rooms.lock().await = rooms;
    }

    pub async fn recorded_sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().await.clone()
    }

    pub async fn recorded_fetches(&self) -> Vec<RecordedFetch> {
        self.fetches.lock().await.clone()
    }
}

#[async_trait]
impl UpstreamBridge for MockBridge {
    async fn send_as(
        &self,
        agent_token: &str,
        room_id: &str,
        content: &str,
    ) -> Result<SendReceipt, ParleyError> {
        if !self.is_connected() {
            return Err(ParleyError::BridgeUnavailable);
        }
        if let Some(status) = *self.fail_sends_with.lock().await {
            return Err(ParleyError::UpstreamSend {
                status: Some(status),
                message: "mock upstream failure".into(),
            });
        }
        self.sends.lock().await.push(RecordedSend {
            agent_token: agent_token.to_string(),
            room_id: room_id.to_string(),
            content: content.to_string(),
        });
        let n = self.send_counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(SendReceipt {
            message_id: format!("srv-msg-{n}"),
        })
    }

    async fn rooms_for(
        &self,
        _agent_token: &str,
        _username: &str,
    ) -> Result<Vec<Room>, ParleyError> {
        Ok(self.rooms.lock().await.clone())
    }

    async fn fetch_since(
        &self,
        agent_token: &str,
        room_id: &str,
        after_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, ParleyError> {
        self.fetches.lock().await.push(RecordedFetch {
            agent_token: agent_token.to_string(),
            room_id: room_id.to_string(),
            after_id: after_id.to_string(),
            limit,
        });
        Ok(self
            .history
            .lock()
            .await
            .iter()
            .filter(|m| m.room_id == room_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
