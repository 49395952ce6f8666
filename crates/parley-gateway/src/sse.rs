// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-Sent Events stream sessions.
//!
//! Authentication is on the HTTP request itself, so every reconnect is
//! re-authenticated. A `Last-Event-ID` header resumes: entries above the
//! presented id are replayed from the event log with their original ids
//! before live fanout takes over. Two streams per principal, no more.

use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    Extension,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use parley_core::Agent;
use parley_session::{StreamEvent, StreamHandle, StreamRegisterError};

use crate::server::GatewayState;

/// Comment-line heartbeat interval, to defeat proxy idle timeouts.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Outbound buffer per stream session.
const STREAM_BUFFER: usize = 64;

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

/// Parse the `Last-Event-ID` request header; absent or malformed means 0.
pub fn parse_last_event_id(headers: &HeaderMap) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

fn to_sse_event(event: StreamEvent) -> Event {
    let mut out = Event::default().event(event.name).data(event.data);
    if let Some(id) = event.id {
        out = out.id(id.to_string());
    }
    out
}

/// Deregisters the stream session when the peer goes away.
struct StreamGuard {
    state: GatewayState,
    principal_id: String,
    stream_id: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.state
            .streams
            .deregister(&self.principal_id, &self.stream_id);
        self.state.metrics.connection_closed();
        tracing::debug!(
            principal_id = %self.principal_id,
            stream_id = %self.stream_id,
            "stream session closed"
        );
    }
}

/// GET /byoa/sse/stream
pub async fn stream_handler(
    State(state): State<GatewayState>,
    Extension(agent): Extension<Agent>,
    headers: HeaderMap,
) -> Sse<KeepAliveStream<EventStream>> {
    let last_event_id = parse_last_event_id(&headers);
    let stream_id = uuid::Uuid::new_v4().to_string();

    let (tx, rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
    let registration = state.streams.register(
        &agent.id,
        StreamHandle {
            stream_id: stream_id.clone(),
            resumed_from: last_event_id,
            tx,
        },
    );

    if let Err(StreamRegisterError::TooManyConnections) = registration {
        let error_event = Event::default().event("error").data(
            json!({
                "code": "TOO_MANY_CONNECTIONS",
                "message": "at most 2 concurrent streams per agent",
            })
            .to_string(),
        );
        let stream: EventStream = Box::pin(stream::iter(vec![Ok(error_event)]));
        return Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(HEARTBEAT_INTERVAL)
                .text("keep-alive"),
        );
    }

    state.metrics.connection_opened();
    tracing::info!(
        agent = %agent.username,
        stream_id = %stream_id,
        last_event_id,
        "stream session opened"
    );

    let connected = Event::default().event("connected").data(
        json!({
            "agent": {
                "id": agent.id,
                "username": agent.username,
                "name": agent.name,
                "emoji": agent.emoji,
            },
            "trustLevel": agent.trust,
            "serverTime": chrono::Utc::now().to_rfc3339(),
        })
        .to_string(),
    );

    // Missed entries, ascending, with their original ids.
    let replay: Vec<Result<Event, Infallible>> = if last_event_id > 0 {
        state
            .event_log
            .since(last_event_id)
            .into_iter()
            .map(|entry| {
                Ok(to_sse_event(StreamEvent {
                    id: Some(entry.event_id),
                    name: "message",
                    data: entry.payload,
                }))
            })
            .collect()
    } else {
        Vec::new()
    };

    let guard = StreamGuard {
        state,
        principal_id: agent.id.clone(),
        stream_id,
    };

    // Live fanout; the guard travels with the unfold state so peer
    // disconnect deregisters the session.
    let live = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|event| (Ok(to_sse_event(event)), (rx, guard)))
    });

    let stream: EventStream = Box::pin(
        stream::iter(vec![Ok(connected)])
            .chain(stream::iter(replay))
            .chain(live),
    );

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("keep-alive"),
    )
}
