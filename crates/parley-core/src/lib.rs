// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley agent gateway.
//!
//! This crate provides the foundational types, the error enum, and the
//! trait seams used throughout the Parley workspace: the upstream bridge
//! interface the router consumes, and the local inject sink.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::ParleyError;
pub use traits::{InjectSink, UpstreamBridge};
pub use types::{
    Agent, AgentStatus, ConnectionType, ContextEntry, DeliveryMode, InboundMessage,
    OutboundMessage, ReceiveMode, Room, SendReceipt, SenderKind, SessionCredential, TrustLevel,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_variants_construct() {
        let _config = ParleyError::Config("bad".into());
        let _auth = ParleyError::Auth("unknown token".into());
        let _input = ParleyError::InvalidInput("content too long".into());
        let _rate = ParleyError::RateLimited {
            retry_after_secs: 12,
        };
        let _bridge = ParleyError::BridgeUnavailable;
        let _send = ParleyError::UpstreamSend {
            status: Some(500),
            message: "boom".into(),
        };
        let _http = ParleyError::Http {
            message: "refused".into(),
            source: None,
        };
        let _storage = ParleyError::Storage {
            source: Box::new(std::io::Error::other("disk")),
        };
        let _timeout = ParleyError::Timeout {
            duration: std::time::Duration::from_secs(10),
        };
        let _internal = ParleyError::Internal("bug".into());
    }

    #[test]
    fn trait_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn UpstreamBridge>();
        assert_send_sync::<dyn InjectSink>();
    }
}
