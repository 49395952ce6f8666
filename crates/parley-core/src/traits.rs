// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the gateway and its collaborators.
//!
//! The upstream chat server is consumed only through [`UpstreamBridge`], so
//! alternative backends can be substituted. The co-located agent runtime is
//! reached only through [`InjectSink`].

use async_trait::async_trait;

use crate::error::ParleyError;
use crate::types::{Agent, ContextEntry, InboundMessage, Room, SendReceipt};

/// The narrow interface onto the upstream chat server.
///
/// The live inbound feed is not part of this trait: the bridge hands the
/// router an mpsc receiver at wiring time, which preserves upstream ordering
/// at a single point and gives natural back-pressure.
#[async_trait]
pub trait UpstreamBridge: Send + Sync {
    /// Forward a message to a room under the *agent's* credentials.
    async fn send_as(
        &self,
        agent_token: &str,
        room_id: &str,
        content: &str,
    ) -> Result<SendReceipt, ParleyError>;

    /// Enumerate rooms visible to the agent.
    async fn rooms_for(
        &self,
        agent_token: &str,
        username: &str,
    ) -> Result<Vec<Room>, ParleyError>;

    /// Fetch room history after a message id, oldest first.
    async fn fetch_since(
        &self,
        agent_token: &str,
        room_id: &str,
        after_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, ParleyError>;

    /// Whether the bridge currently holds a live upstream session.
    fn is_connected(&self) -> bool;
}

/// Fire-and-forget sink that injects text into a co-located agent runtime.
///
/// Failures are logged by implementations and never propagate into routing.
#[async_trait]
pub trait InjectSink: Send + Sync {
    async fn inject(&self, agent: &Agent, message: &InboundMessage, context: &[ContextEntry]);
}
