// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live feed socket and reconnection state machine.
//!
//! One background task owns the upstream WebSocket for the life of the
//! process. Because reconnection lives entirely inside that task, disconnect
//! signals are naturally coalesced: there is never more than one reconnect
//! attempt in flight, and the `reconnecting` flag only publishes that fact
//! to observers.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::wire::FeedEvent;
use crate::{BridgeShared, BridgeState};

/// Timeout for the initial WebSocket connect.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection with no upstream traffic for this long is presumed dead.
pub(crate) const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Exponential backoff: 2 s base, doubling, capped at 30 s.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let secs = 2u64.saturating_mul(1u64 << attempt.min(5));
    Duration::from_secs(secs.min(30))
}

/// Whether a server close reason indicates the session credential is dead.
pub(crate) fn close_invalidates_credential(reason: &str) -> bool {
    let lowered = reason.to_lowercase();
    lowered.contains("token") || lowered.contains("auth") || lowered.contains("credential")
}

/// Run the feed until cancelled. Never returns an error: every failure path
/// re-enters the reconnect loop.
pub(crate) async fn run_feed(shared: Arc<BridgeShared>, cancel: CancellationToken) {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        shared.set_state(BridgeState::Authenticating);
        let credential = {
            let mut cache = shared.credentials.lock().await;
            cache
                .acquire(&shared.http, &shared.username, &shared.gateway_token)
                .await
        };
        let credential = match credential {
            Ok(cred) => cred,
            Err(e) => {
                warn!(error = %e, "upstream authentication failed");
                shared.set_state(BridgeState::Disconnected);
                if wait_backoff(&cancel, &mut attempt).await {
                    break;
                }
                continue;
            }
        };

        let url = format!("{}?token={}", shared.feed_url, credential.token);
        let connected =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await;
        let mut ws = match connected {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                warn!(error = %e, "upstream feed connect failed");
                shared.set_state(BridgeState::Disconnected);
                if wait_backoff(&cancel, &mut attempt).await {
                    break;
                }
                continue;
            }
            Err(_) => {
                warn!("upstream feed connect timed out");
                shared.set_state(BridgeState::Disconnected);
                if wait_backoff(&cancel, &mut attempt).await {
                    break;
                }
                continue;
            }
        };

        shared.set_state(BridgeState::Connected);
        shared.reconnecting.store(false, Ordering::Relaxed);
        attempt = 0;
        info!("upstream feed connected");

        // Read until the connection dies, goes silent, or shutdown begins.
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    shared.set_state(BridgeState::Closing);
                    let _ = ws.close(None).await;
                    return;
                }
                frame = tokio::time::timeout(IDLE_TIMEOUT, ws.next()) => frame,
            };

            match frame {
                Err(_) => {
                    warn!("no upstream activity for 60s, recycling connection");
                    let _ = ws.close(None).await;
                    break;
                }
                Ok(None) => {
                    debug!("upstream feed stream ended");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "upstream feed read error");
                    break;
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    handle_text(&shared, &text).await;
                }
                Ok(Some(Ok(Message::Ping(payload)))) => {
                    let _ = ws.send(Message::Pong(payload)).await;
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    let reason = frame
                        .as_ref()
                        .map(|f| f.reason.to_string())
                        .unwrap_or_default();
                    info!(reason = %reason, "upstream closed the feed");
                    if close_invalidates_credential(&reason) {
                        shared.credentials.lock().await.invalidate().await;
                    }
                    break;
                }
                Ok(Some(Ok(_))) => {}
            }
        }

        shared.set_state(BridgeState::Disconnected);
        shared.reconnecting.store(true, Ordering::Relaxed);
        if wait_backoff(&cancel, &mut attempt).await {
            break;
        }
    }

    shared.set_state(BridgeState::Closing);
}

async fn handle_text(shared: &BridgeShared, text: &str) {
    match serde_json::from_str::<FeedEvent>(text) {
        Ok(FeedEvent::Message(wire)) => {
            let inbound = wire.normalize();
            // In-order handoff to the router; back-pressure applies here.
            if shared.inbound_tx.send(inbound).await.is_err() {
                warn!("router dropped its inbound receiver");
            }
        }
        Ok(FeedEvent::Ping) | Ok(FeedEvent::Unknown) => {}
        Err(e) => debug!(error = %e, "ignoring unparseable feed frame"),
    }
}

/// Sleep for the next backoff step. Returns true when cancelled.
async fn wait_backoff(cancel: &CancellationToken, attempt: &mut u32) -> bool {
    let delay = backoff_delay(*attempt);
    *attempt = attempt.saturating_add(1);
    debug!(delay_secs = delay.as_secs(), "scheduling upstream reconnect");
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = cancel.cancelled() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_two_and_caps_at_thirty() {
        let secs: Vec<u64> = (0..7).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn token_close_reasons_invalidate() {
        assert!(close_invalidates_credential("token invalidated"));
        assert!(close_invalidates_credential("Auth expired"));
        assert!(close_invalidates_credential("bad credential"));
        assert!(!close_invalidates_credential("server restarting"));
        assert!(!close_invalidates_credential(""));
    }
}
