// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Parley agent gateway.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup.

use serde::{Deserialize, Serialize};

/// Top-level Parley configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// Downstream HTTP/WS surface settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Upstream chat server settings.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Agent registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// On-disk state settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Request limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            upstream: UpstreamConfig::default(),
            registry: RegistryConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Downstream surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Upstream chat server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the chat server's HTTP API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// WebSocket URL for the live message feed. Derived from `base_url`
    /// when empty.
    #[serde(default)]
    pub ws_url: Option<String>,

    /// The gateway's own principal token.
    #[serde(default)]
    pub gateway_token: Option<String>,

    /// The gateway's own principal username.
    #[serde(default = "default_gateway_username")]
    pub gateway_username: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: None,
            gateway_token: None,
            gateway_username: default_gateway_username(),
        }
    }
}

impl UpstreamConfig {
    /// Resolve the feed WS URL, deriving `ws(s)://…` from the base URL when
    /// not configured explicitly.
    pub fn feed_url(&self) -> String {
        match &self.ws_url {
            Some(url) => url.clone(),
            None => {
                let derived = self
                    .base_url
                    .replacen("https://", "wss://", 1)
                    .replacen("http://", "ws://", 1);
                format!("{}/api/agent/feed", derived.trim_end_matches('/'))
            }
        }
    }
}

/// Agent registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Fetch the agent snapshot from the upstream config endpoint.
    #[serde(default = "default_true")]
    pub endpoint_enabled: bool,

    /// Local JSON bootstrap file. Used when the endpoint is disabled or
    /// unreachable at startup.
    #[serde(default)]
    pub file: Option<String>,

    /// Seconds between registry refreshes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint_enabled: default_true(),
            file: None,
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

/// On-disk state configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory holding the credential cache, read tracker, metrics log,
    /// and event-id checkpoint.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

/// Request limit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum accepted message content length, in characters.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Per-minute send allowance for standard-trust agents.
    #[serde(default = "default_rate_standard")]
    pub sends_per_minute_standard: u32,

    /// Per-minute send allowance for elevated-trust agents.
    #[serde(default = "default_rate_elevated")]
    pub sends_per_minute_elevated: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_content_length: default_max_content_length(),
            sends_per_minute_standard: default_rate_standard(),
            sends_per_minute_elevated: default_rate_elevated(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9500
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_gateway_username() -> String {
    "gateway".to_string()
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_state_dir() -> String {
    ".parley".to_string()
}

fn default_max_content_length() -> usize {
    4_000
}

fn default_rate_standard() -> u32 {
    10
}

fn default_rate_elevated() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}
