// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expiry-aware credential cache for the gateway's upstream session.
//!
//! One credential, one JSON file. A 60 s skew buffer is subtracted from the
//! stored expiry so a credential is never presented moments before it dies.

use std::path::PathBuf;

use chrono::Duration as ChronoDuration;
use tracing::{debug, warn};

use parley_core::{ParleyError, SessionCredential};

use crate::http::UpstreamHttpClient;

/// Skew subtracted from the credential expiry before reuse.
const EXPIRY_SKEW_SECS: i64 = 60;

/// File-backed cache of the gateway's upstream session credential.
pub struct CredentialCache {
    path: PathBuf,
    cached: Option<SessionCredential>,
}

impl CredentialCache {
    /// Open the cache, loading any previously persisted credential.
    pub async fn open(path: PathBuf) -> Self {
        let cached = match tokio::fs::read_to_string(&path).await {
            Ok(body) => match serde_json::from_str::<SessionCredential>(&body) {
                Ok(cred) => Some(cred),
                Err(e) => {
                    warn!(error = %e, "discarding unreadable credential cache");
                    None
                }
            },
            Err(_) => None,
        };
        Self { path, cached }
    }

    /// Return a fresh credential, acquiring a new one from the upstream when
    /// the cached credential is absent or inside the skew window.
    pub async fn acquire(
        &mut self,
        http: &UpstreamHttpClient,
        username: &str,
        gateway_token: &str,
    ) -> Result<SessionCredential, ParleyError> {
        if let Some(cred) = &self.cached {
            if cred.is_fresh(ChronoDuration::seconds(EXPIRY_SKEW_SECS)) {
                return Ok(cred.clone());
            }
            debug!("cached upstream credential expired, refreshing");
        }

        let cred = http.authenticate(username, gateway_token, "gateway").await?;
        self.persist(&cred).await;
        self.cached = Some(cred.clone());
        Ok(cred)
    }

    /// Drop the credential. Called when the upstream's close reason points
    /// at token invalidation.
    pub async fn invalidate(&mut self) {
        self.cached = None;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove credential cache file");
            }
        }
    }

    async fn persist(&self, cred: &SessionCredential) {
        match serde_json::to_string_pretty(cred) {
            Ok(body) => {
                if let Err(e) = tokio::fs::write(&self.path, body).await {
                    warn!(error = %e, "failed to persist credential cache");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize credential"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{method, path as wm_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_mock(token: &str) -> Mock {
        Mock::given(method("POST"))
            .and(wm_path("/api/agent/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": token,
                "expiresAt": (Utc::now() + ChronoDuration::hours(1)).to_rfc3339()
            })))
    }

    #[tokio::test]
    async fn acquires_and_persists() {
        let server = MockServer::start().await;
        auth_mock("sess_1").expect(1).mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("credential.json");
        let http = UpstreamHttpClient::new(server.uri()).unwrap();

        let mut cache = CredentialCache::open(cache_path.clone()).await;
        let first = cache.acquire(&http, "gw", "gw_token").await.unwrap();
        assert_eq!(first.token, "sess_1");

        // Second call must reuse the cached credential (mock expects 1 call).
        let second = cache.acquire(&http, "gw", "gw_token").await.unwrap();
        assert_eq!(second.token, "sess_1");

        // And the file survives for the next process.
        let reopened = CredentialCache::open(cache_path).await;
        assert_eq!(reopened.cached.unwrap().token, "sess_1");
    }

    #[tokio::test]
    async fn refreshes_inside_skew_window() {
        let server = MockServer::start().await;
        auth_mock("sess_new").mount(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("credential.json");
        // Seed a credential that expires within the 60 s skew.
        let stale = SessionCredential {
            token: "sess_stale".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(30),
        };
        tokio::fs::write(&cache_path, serde_json::to_string(&stale).unwrap())
            .await
            .unwrap();

        let http = UpstreamHttpClient::new(server.uri()).unwrap();
        let mut cache = CredentialCache::open(cache_path).await;
        let cred = cache.acquire(&http, "gw", "gw_token").await.unwrap();
        assert_eq!(cred.token, "sess_new");
    }

    #[tokio::test]
    async fn invalidate_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("credential.json");
        let cred = SessionCredential {
            token: "sess".into(),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        };
        tokio::fs::write(&cache_path, serde_json::to_string(&cred).unwrap())
            .await
            .unwrap();

        let mut cache = CredentialCache::open(cache_path.clone()).await;
        cache.invalidate().await;
        assert!(!cache_path.exists());
        assert!(cache.cached.is_none());
    }
}
