// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! REST client for the upstream chat server's agent API.
//!
//! Covers session authentication, sending as an agent, room enumeration,
//! and unread-history fetches. Send failures are classified so callers can
//! map them onto the right HTTP status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use parley_core::{InboundMessage, ParleyError, Room, SendReceipt, SessionCredential};

use crate::wire::WireMessage;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct RoomsResponse {
    rooms: Vec<Room>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<WireMessage>,
}

/// HTTP client for the upstream agent API.
#[derive(Debug, Clone)]
pub struct UpstreamHttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl UpstreamHttpClient {
    pub fn new(base_url: String) -> Result<Self, ParleyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ParleyError::Http {
                message: format!("failed to build upstream HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Acquire a session credential for a principal.
    pub async fn authenticate(
        &self,
        username: &str,
        token: &str,
        kind: &str,
    ) -> Result<SessionCredential, ParleyError> {
        let response = self
            .client
            .post(format!("{}/api/agent/auth", self.base_url))
            .json(&json!({ "username": username, "token": token, "kind": kind }))
            .send()
            .await
            .map_err(|e| ParleyError::Http {
                message: format!("upstream auth request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ParleyError::Auth(format!(
                "upstream rejected credentials for {username}"
            )));
        }
        if !status.is_success() {
            return Err(ParleyError::Http {
                message: format!("upstream auth returned {status}"),
                source: None,
            });
        }

        let body: AuthResponse = response.json().await.map_err(|e| ParleyError::Http {
            message: format!("invalid upstream auth response: {e}"),
            source: Some(Box::new(e)),
        })?;
        Ok(SessionCredential {
            token: body.token,
            expires_at: body.expires_at,
        })
    }

    /// Send a room message under the agent's own credentials.
    pub async fn send_as(
        &self,
        agent_token: &str,
        room_id: &str,
        content: &str,
    ) -> Result<SendReceipt, ParleyError> {
        let response = self
            .client
            .post(format!("{}/api/agent/send", self.base_url))
            .bearer_auth(agent_token)
            .json(&json!({ "roomId": room_id, "content": content }))
            .send()
            .await
            .map_err(|e| ParleyError::Http {
                message: format!("upstream send request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => {
                let body: SendResponse =
                    response.json().await.map_err(|e| ParleyError::Http {
                        message: format!("invalid upstream send response: {e}"),
                        source: Some(Box::new(e)),
                    })?;
                Ok(SendReceipt {
                    message_id: body.message_id,
                })
            }
            400 => Err(ParleyError::InvalidInput(
                read_error_detail(response).await,
            )),
            401 | 403 => Err(ParleyError::Auth(read_error_detail(response).await)),
            code => Err(ParleyError::UpstreamSend {
                status: Some(code),
                message: read_error_detail(response).await,
            }),
        }
    }

    /// Enumerate rooms visible to the agent.
    pub async fn rooms_for(
        &self,
        agent_token: &str,
        username: &str,
    ) -> Result<Vec<Room>, ParleyError> {
        let response = self
            .client
            .get(format!("{}/api/agent/rooms", self.base_url))
            .query(&[("username", username)])
            .bearer_auth(agent_token)
            .send()
            .await
            .map_err(|e| ParleyError::Http {
                message: format!("rooms request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ParleyError::Http {
                message: format!("rooms endpoint returned {status}"),
                source: None,
            });
        }
        let body: RoomsResponse = response.json().await.map_err(|e| ParleyError::Http {
            message: format!("invalid rooms response: {e}"),
            source: Some(Box::new(e)),
        })?;
        Ok(body.rooms)
    }

    /// Fetch room history after a message id, oldest first.
    pub async fn fetch_since(
        &self,
        agent_token: &str,
        room_id: &str,
        after_id: &str,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, ParleyError> {
        let response = self
            .client
            .get(format!(
                "{}/api/agent/rooms/{room_id}/messages",
                self.base_url
            ))
            .query(&[("after", after_id), ("limit", &limit.to_string())])
            .bearer_auth(agent_token)
            .send()
            .await
            .map_err(|e| ParleyError::Http {
                message: format!("history request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ParleyError::Http {
                message: format!("history endpoint returned {status}"),
                source: None,
            });
        }
        let body: MessagesResponse =
            response.json().await.map_err(|e| ParleyError::Http {
                message: format!("invalid history response: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(body.messages.into_iter().map(WireMessage::normalize).collect())
    }
}

async fn read_error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.is_empty() => body,
        _ => format!("upstream returned {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn authenticate_parses_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/auth"))
            .and(body_partial_json(json!({"username": "gw", "kind": "gateway"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "sess_abc",
                "expiresAt": "2026-03-01T12:00:00Z"
            })))
            .mount(&server)
            .await;

        let client = UpstreamHttpClient::new(server.uri()).unwrap();
        let cred = client.authenticate("gw", "gw_token", "gateway").await.unwrap();
        assert_eq!(cred.token, "sess_abc");
    }

    #[tokio::test]
    async fn authenticate_maps_401_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/auth"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = UpstreamHttpClient::new(server.uri()).unwrap();
        let err = client.authenticate("gw", "bad", "gateway").await.unwrap_err();
        assert!(matches!(err, ParleyError::Auth(_)));
    }

    #[tokio::test]
    async fn send_as_success_returns_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/send"))
            .and(header("authorization", "Bearer byoa_bob"))
            .and(body_partial_json(json!({"roomId": "r-1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"messageId": "msg-7"})),
            )
            .mount(&server)
            .await;

        let client = UpstreamHttpClient::new(server.uri()).unwrap();
        let receipt = client.send_as("byoa_bob", "r-1", "hi").await.unwrap();
        assert_eq!(receipt.message_id, "msg-7");
    }

    #[tokio::test]
    async fn send_as_classifies_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/send"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let client = UpstreamHttpClient::new(server.uri()).unwrap();
        let err = client.send_as("t", "r", "c").await.unwrap_err();
        match err {
            ParleyError::UpstreamSend { status, message } => {
                assert_eq!(status, Some(500));
                assert_eq!(message, "oops");
            }
            other => panic!("expected UpstreamSend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rooms_for_returns_rooms() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agent/rooms"))
            .and(query_param("username", "bob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rooms": [{"id": "r-1", "name": "general"}]
            })))
            .mount(&server)
            .await;

        let client = UpstreamHttpClient::new(server.uri()).unwrap();
        let rooms = client.rooms_for("byoa_bob", "bob").await.unwrap();
        assert_eq!(rooms, vec![Room { id: "r-1".into(), name: "general".into() }]);
    }

    #[tokio::test]
    async fn fetch_since_normalizes_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agent/rooms/r-1/messages"))
            .and(query_param("after", "msg-100"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{
                    "id": "msg-101",
                    "roomId": "r-1",
                    "roomName": "general",
                    "sender": "alice",
                    "senderId": "u-alice",
                    "senderType": "human",
                    "content": "hello",
                    "timestamp": "2026-03-01T10:00:00Z"
                }]
            })))
            .mount(&server)
            .await;

        let client = UpstreamHttpClient::new(server.uri()).unwrap();
        let messages = client
            .fetch_since("byoa_bob", "r-1", "msg-100", 50)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "msg-101");
    }
}
