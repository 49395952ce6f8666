// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Snapshot sources for the agent registry.
//!
//! The authoritative source is the upstream configuration endpoint,
//! authenticated with the gateway's own token. A local JSON file serves as
//! a bootstrap fallback, or as the sole source when the endpoint is
//! disabled. The two are never merged: whichever source a refresh reads
//! from replaces the snapshot wholesale.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use parley_core::{Agent, ParleyError};

/// Accepts both a bare JSON array and a `{"agents": […]}` document.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AgentDocument {
    Wrapped { agents: Vec<Agent> },
    Bare(Vec<Agent>),
}

impl AgentDocument {
    fn into_agents(self) -> Vec<Agent> {
        match self {
            AgentDocument::Wrapped { agents } => agents,
            AgentDocument::Bare(agents) => agents,
        }
    }
}

/// Where agent snapshots come from.
pub struct ConfigSource {
    client: reqwest::Client,
    /// `None` disables the endpoint; the file becomes authoritative.
    endpoint: Option<String>,
    gateway_token: Option<String>,
    file: Option<PathBuf>,
}

impl ConfigSource {
    pub fn new(
        endpoint: Option<String>,
        gateway_token: Option<String>,
        file: Option<PathBuf>,
    ) -> Result<Self, ParleyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ParleyError::Http {
                message: format!("failed to build registry HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            client,
            endpoint,
            gateway_token,
            file,
        })
    }

    /// Fetch the current snapshot from the preferred source.
    ///
    /// Endpoint first when configured; the file is only consulted when no
    /// endpoint is available.
    pub async fn fetch(&self) -> Result<Vec<Agent>, ParleyError> {
        if self.endpoint.is_some() {
            self.fetch_endpoint().await
        } else {
            self.read_file().await
        }
    }

    /// Bootstrap load: endpoint when configured, falling back to the file
    /// if the endpoint is unreachable. Fails when neither yields agents.
    pub async fn bootstrap(&self) -> Result<Vec<Agent>, ParleyError> {
        if self.endpoint.is_some() {
            match self.fetch_endpoint().await {
                Ok(agents) => return Ok(agents),
                Err(e) if self.file.is_some() => {
                    debug!(error = %e, "config endpoint unreachable, trying bootstrap file");
                }
                Err(e) => return Err(e),
            }
        }
        self.read_file().await
    }

    async fn fetch_endpoint(&self) -> Result<Vec<Agent>, ParleyError> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| ParleyError::Config("registry endpoint not configured".into()))?;
        let mut request = self.client.get(endpoint);
        if let Some(token) = &self.gateway_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| ParleyError::Http {
            message: format!("agent config fetch failed: {e}"),
            source: Some(Box::new(e)),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ParleyError::Http {
                message: format!("agent config endpoint returned {status}"),
                source: None,
            });
        }

        let body = response.text().await.map_err(|e| ParleyError::Http {
            message: format!("failed to read agent config body: {e}"),
            source: Some(Box::new(e)),
        })?;
        parse_agents(&body)
    }

    async fn read_file(&self) -> Result<Vec<Agent>, ParleyError> {
        let path = self
            .file
            .as_ref()
            .ok_or_else(|| ParleyError::Config("no agent config file configured".into()))?;
        let body = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ParleyError::Storage {
                source: Box::new(e),
            })?;
        parse_agents(&body)
    }
}

fn parse_agents(body: &str) -> Result<Vec<Agent>, ParleyError> {
    let document: AgentDocument =
        serde_json::from_str(body).map_err(|e| ParleyError::Config(format!(
            "invalid agent config document: {e}"
        )))?;
    Ok(document.into_agents())
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT_JSON: &str = r#"{
        "id": "a-1",
        "username": "bob",
        "name": "Bob",
        "mention_key": "bob",
        "trust": "standard",
        "receive": "mentions",
        "connection": "webhook",
        "delivery": "webhook",
        "token": "byoa_bob",
        "status": "active"
    }"#;

    #[test]
    fn parses_bare_array() {
        let agents = parse_agents(&format!("[{AGENT_JSON}]")).unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].username, "bob");
    }

    #[test]
    fn parses_wrapped_document() {
        let agents = parse_agents(&format!(r#"{{"agents":[{AGENT_JSON}]}}"#)).unwrap();
        assert_eq!(agents.len(), 1);
    }

    #[test]
    fn rejects_malformed_document() {
        assert!(parse_agents("{not json").is_err());
    }

    #[tokio::test]
    async fn endpoint_fetch_sends_bearer() {
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/agents/config"))
            .and(header("authorization", "Bearer gw_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"agents":[{AGENT_JSON}]}}"#)),
            )
            .mount(&server)
            .await;

        let source = ConfigSource::new(
            Some(format!("{}/api/agents/config", server.uri())),
            Some("gw_token".into()),
            None,
        )
        .unwrap();
        let agents = source.fetch().await.unwrap();
        assert_eq!(agents[0].id, "a-1");
    }

    #[tokio::test]
    async fn bootstrap_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("agents.json");
        tokio::fs::write(&file, format!("[{AGENT_JSON}]"))
            .await
            .unwrap();

        // Unroutable endpoint forces the fallback.
        let source = ConfigSource::new(
            Some("http://127.0.0.1:1/api/agents/config".into()),
            Some("gw_token".into()),
            Some(file),
        )
        .unwrap();
        let agents = source.bootstrap().await.unwrap();
        assert_eq!(agents.len(), 1);
    }

    #[tokio::test]
    async fn bootstrap_fails_with_no_source() {
        let source = ConfigSource::new(None, None, None).unwrap();
        assert!(source.bootstrap().await.is_err());
    }
}
