// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upstream bridge: the gateway's one privileged session to the chat server.
//!
//! The bridge owns credential management, the REST client for agent-scoped
//! calls, and the live feed socket with its reconnection state machine.
//! Inbound messages are handed to the router through a bounded mpsc channel
//! in upstream order; the bridge never reorders. Across reconnects no
//! ordering guarantee is offered and the router must tolerate redelivery.

pub mod credentials;
pub mod feed;
pub mod http;
pub mod wire;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_core::{
    InboundMessage, ParleyError, Room, SendReceipt, UpstreamBridge,
};

pub use credentials::CredentialCache;
pub use http::UpstreamHttpClient;

/// Capacity of the bridge -> router channel. Bounded for back-pressure.
const INBOUND_QUEUE_CAPACITY: usize = 256;

/// States of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Authenticating,
    Connected,
    Closing,
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeState::Disconnected => write!(f, "disconnected"),
            BridgeState::Authenticating => write!(f, "authenticating"),
            BridgeState::Connected => write!(f, "connected"),
            BridgeState::Closing => write!(f, "closing"),
        }
    }
}

/// State shared between the bridge handle and the feed task.
pub(crate) struct BridgeShared {
    pub(crate) http: UpstreamHttpClient,
    pub(crate) credentials: tokio::sync::Mutex<CredentialCache>,
    pub(crate) feed_url: String,
    pub(crate) username: String,
    pub(crate) gateway_token: String,
    pub(crate) state: RwLock<BridgeState>,
    pub(crate) reconnecting: AtomicBool,
    pub(crate) inbound_tx: mpsc::Sender<InboundMessage>,
}

impl BridgeShared {
    pub(crate) fn set_state(&self, next: BridgeState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = next;
        }
    }

    fn state(&self) -> BridgeState {
        self.state
            .read()
            .map(|g| *g)
            .unwrap_or(BridgeState::Disconnected)
    }
}

/// The production [`UpstreamBridge`] implementation.
pub struct ChatBridge {
    shared: Arc<BridgeShared>,
}

impl ChatBridge {
    /// Build a bridge. Returns the bridge handle and the inbound receiver
    /// the router consumes.
    pub async fn new(
        base_url: String,
        feed_url: String,
        username: String,
        gateway_token: String,
        credential_cache_path: PathBuf,
    ) -> Result<(Self, mpsc::Receiver<InboundMessage>), ParleyError> {
        let http = UpstreamHttpClient::new(base_url)?;
        let credentials = CredentialCache::open(credential_cache_path).await;
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);

        let shared = Arc::new(BridgeShared {
            http,
            credentials: tokio::sync::Mutex::new(credentials),
            feed_url,
            username,
            gateway_token,
            state: RwLock::new(BridgeState::Disconnected),
            reconnecting: AtomicBool::new(false),
            inbound_tx,
        });

        Ok((Self { shared }, inbound_rx))
    }

    /// Start the feed task. The task runs until the token is cancelled.
    pub fn start(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            feed::run_feed(shared, cancel).await;
        })
    }

    /// Current connection state, for status surfaces.
    pub fn state(&self) -> BridgeState {
        self.shared.state()
    }
}

#[async_trait]
impl UpstreamBridge for ChatBridge {
    async fn send_as(
        &self,
        agent_token: &str,
        room_id: &str,
        content: &str,
    ) -> Result<SendReceipt, ParleyError> {
        if !self.is_connected() {
            return Err(ParleyError::BridgeUnavailable);
        }
        self.shared.http.send_as(agent_token, room_id, content).await
    }

    async fn rooms_for(
        &self,
        agent_token: &str,
        username: &str,
    ) -> Result<Vec<Room>, ParleyError> {
        self.shared.http.rooms_for(agent_token, username).await
    }

    async fn fetch_since(
        &self,
        agent_token: &str,
        room_id: &str,
        after_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, ParleyError> {
        self.shared
            .http
            .fetch_since(agent_token, room_id, after_id, limit)
            .await
    }

    fn is_connected(&self) -> bool {
        self.shared.state() == BridgeState::Connected
    }
}
