// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent-socket sessions.
//!
//! First frame must authenticate within 10 s. An authenticated session
//! installs itself in the socket hub, displacing (and closing, code 4000)
//! any prior session for the same principal. Outbound writes go through a
//! writer task fed by an mpsc channel; the router holds the same sender
//! via the hub. Message frames re-authenticate against the current
//! registry snapshot on every send, so a revoked token stops working at
//! its next use, not at the next reconnect.

use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_core::Agent;
use parley_session::{
    AgentSummary, ClientFrame, ServerFrame, SocketCommand, SocketHandle, CLOSE_AUTH_FAILED,
    CLOSE_AUTH_TIMEOUT, CLOSE_REPLACED,
};

use crate::handlers::validate_content;
use crate::server::GatewayState;

/// Deadline for the first (auth) frame.
const AUTH_DEADLINE: Duration = Duration::from_secs(10);

/// Interval of server `ping` frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound buffer per socket session.
const SOCKET_BUFFER: usize = 64;

/// WebSocket upgrade handler for `/byoa/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    state.metrics.connection_opened();
    run_session(socket, &state).await;
    state.metrics.connection_closed();
}

async fn run_session(socket: WebSocket, state: &GatewayState) {
    let (sink, mut receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<SocketCommand>(SOCKET_BUFFER);
    let writer = tokio::spawn(write_loop(sink, rx));

    // Auth phase: exactly one frame, within the deadline.
    let agent = match authenticate_first_frame(&mut receiver, &tx, state).await {
        Some(agent) => agent,
        None => {
            drop(tx);
            let _ = writer.await;
            return;
        }
    };

    let conn_id = uuid::Uuid::new_v4().to_string();
    let token = agent.token.clone();

    // Replace-on-reconnect: capture the prior session, install ourselves,
    // then close the prior outside the map entry.
    let prior = state.sockets.install(
        &agent.id,
        SocketHandle {
            conn_id: conn_id.clone(),
            username: agent.username.clone(),
            token: token.clone(),
            tx: tx.clone(),
        },
    );
    if let Some(prior) = prior {
        prior.send_frame(ServerFrame::Error {
            code: "REPLACED".into(),
            message: "a newer session authenticated for this agent".into(),
        });
        prior.send_close(CLOSE_REPLACED, "replaced");
    }

    let rooms = match state.bridge.rooms_for(&token, &agent.username).await {
        Ok(rooms) => rooms,
        Err(e) => {
            warn!(agent = %agent.username, error = %e, "room enumeration failed");
            Vec::new()
        }
    };
    let _ = tx
        .send(SocketCommand::Frame(ServerFrame::AuthOk {
            agent: AgentSummary::from(&agent),
            rooms,
        }))
        .await;

    info!(agent = %agent.username, conn_id = %conn_id, "socket session authenticated");

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_frame(&text, &agent, &tx, state).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary and transport pings are ignored
                    Some(Err(e)) => {
                        debug!(error = %e, "socket read error");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if tx.send(SocketCommand::Frame(ServerFrame::Ping)).await.is_err() {
                    break;
                }
            }
        }
    }

    state.sockets.remove_if_current(&agent.id, &conn_id);
    drop(tx);
    let _ = writer.await;
    info!(agent = %agent.username, conn_id = %conn_id, "socket session closed");
}

/// Await and validate the auth frame. `None` means the session is over;
/// the close has already been queued.
async fn authenticate_first_frame(
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::Sender<SocketCommand>,
    state: &GatewayState,
) -> Option<Agent> {
    let first = tokio::time::timeout(AUTH_DEADLINE, receiver.next()).await;

    let text = match first {
        Err(_) => {
            let _ = tx
                .send(SocketCommand::Close {
                    code: CLOSE_AUTH_TIMEOUT,
                    reason: "authentication timeout".into(),
                })
                .await;
            return None;
        }
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return None,
        Ok(Some(Ok(_))) | Ok(Some(Err(_))) => {
            let _ = tx
                .send(SocketCommand::Close {
                    code: CLOSE_AUTH_FAILED,
                    reason: "expected an auth frame".into(),
                })
                .await;
            return None;
        }
    };

    let token = match serde_json::from_str::<ClientFrame>(&text) {
        Ok(ClientFrame::Auth { token }) => token,
        Ok(_) => {
            let _ = tx
                .send(SocketCommand::Frame(ServerFrame::Error {
                    code: "NOT_AUTHENTICATED".into(),
                    message: "first frame must be auth".into(),
                }))
                .await;
            let _ = tx
                .send(SocketCommand::Close {
                    code: CLOSE_AUTH_FAILED,
                    reason: "not authenticated".into(),
                })
                .await;
            return None;
        }
        Err(_) => {
            let _ = tx
                .send(SocketCommand::Frame(ServerFrame::AuthError {
                    error: "malformed auth frame".into(),
                }))
                .await;
            let _ = tx
                .send(SocketCommand::Close {
                    code: CLOSE_AUTH_FAILED,
                    reason: "malformed auth frame".into(),
                })
                .await;
            return None;
        }
    };

    match state.registry.authenticate(&token) {
        Some(agent) => Some(agent),
        None => {
            state.metrics.auth_failure();
            if state.sockets.has_session_with_token(&token) {
                state.metrics.revoked_while_connected();
            }
            let _ = tx
                .send(SocketCommand::Frame(ServerFrame::AuthError {
                    error: "unknown or inactive token".into(),
                }))
                .await;
            let _ = tx
                .send(SocketCommand::Close {
                    code: CLOSE_AUTH_FAILED,
                    reason: "authentication failed".into(),
                })
                .await;
            None
        }
    }
}

/// Handle one authenticated frame. Returns false when the session must end.
async fn handle_frame(
    text: &str,
    agent: &Agent,
    tx: &mpsc::Sender<SocketCommand>,
    state: &GatewayState,
) -> bool {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Message { room, content }) => {
            if let Err(e) = validate_content(&content, state.rates.max_content_length) {
                let _ = tx
                    .send(SocketCommand::Frame(ServerFrame::Error {
                        code: e.code().into(),
                        message: e.to_string(),
                    }))
                    .await;
                return true;
            }

            // Fresh auth per send: the token may have rotated since the
            // handshake.
            if state.registry.authenticate(&agent.token).is_none() {
                state.metrics.auth_failure();
                state.metrics.revoked_while_connected();
                let _ = tx
                    .send(SocketCommand::Frame(ServerFrame::AuthError {
                        error: "token no longer valid".into(),
                    }))
                    .await;
                let _ = tx
                    .send(SocketCommand::Close {
                        code: CLOSE_AUTH_FAILED,
                        reason: "token revoked".into(),
                    })
                    .await;
                return false;
            }

            match state.bridge.send_as(&agent.token, &room, &content).await {
                Ok(_receipt) => {
                    state.metrics.message_sent();
                    let _ = tx
                        .send(SocketCommand::Frame(ServerFrame::MessageSent { room }))
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(SocketCommand::Frame(ServerFrame::Error {
                            code: "SEND_FAILED".into(),
                            message: e.to_string(),
                        }))
                        .await;
                }
            }
            true
        }
        Ok(ClientFrame::Pong) => true,
        Ok(ClientFrame::Auth { .. }) | Err(_) => {
            let _ = tx
                .send(SocketCommand::Frame(ServerFrame::Error {
                    code: "UNKNOWN_EVENT".into(),
                    message: "unrecognized frame".into(),
                }))
                .await;
            true
        }
    }
}

/// Writer task: serializes frames and performs closes. Owning the sink
/// here keeps all writes for one session on one task.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<SocketCommand>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SocketCommand::Frame(frame) => {
                let Ok(text) = serde_json::to_string(&frame) else {
                    continue;
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            SocketCommand::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}
