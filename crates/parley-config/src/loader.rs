// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./parley.toml` > `~/.config/parley/parley.toml`
//! > `/etc/parley/parley.toml` with environment variable overrides via the
//! `PARLEY_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::ParleyConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/parley/parley.toml` (system-wide)
/// 3. `~/.config/parley/parley.toml` (user XDG config)
/// 4. `./parley.toml` (local directory)
/// 5. `PARLEY_*` environment variables
pub fn load_config() -> Result<ParleyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::file("/etc/parley/parley.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("parley/parley.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("parley.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no file or env lookup).
pub fn load_config_from_str(toml_content: &str) -> Result<ParleyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ParleyConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ParleyConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Top-level config sections that env keys may address.
const SECTIONS: [&str; 5] = ["gateway", "upstream", "registry", "storage", "limits"];

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `PARLEY_UPSTREAM_GATEWAY_TOKEN` must map
/// to `upstream.gateway_token`, not `upstream.gateway.token`.
fn env_provider() -> Env {
    Env::prefixed("PARLEY_").map(|key| map_env_key(key.as_str()).into())
}

/// Convert a prefix-stripped, lowercased env key into a config key path.
///
/// Only the first segment may name a section; every underscore after it
/// belongs to the field name. Keys whose first segment is not a section
/// (e.g. `log_level`) pass through untouched.
fn map_env_key(key: &str) -> String {
    match key.split_once('_') {
        Some((section, rest)) if SECTIONS.contains(&section) => format!("{section}.{rest}"),
        _ => key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_toml() {
        let toml = r#"
            log_level = "debug"

            [gateway]
            host = "0.0.0.0"
            port = 9600

            [upstream]
            base_url = "https://chat.example.com"
            gateway_token = "gw_secret"
            gateway_username = "parley-gw"

            [registry]
            endpoint_enabled = false
            file = "agents.json"

            [storage]
            state_dir = "/var/lib/parley"

            [limits]
            max_content_length = 2000
        "#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.gateway.port, 9600);
        assert_eq!(config.upstream.gateway_token.as_deref(), Some("gw_secret"));
        assert!(!config.registry.endpoint_enabled);
        assert_eq!(config.registry.file.as_deref(), Some("agents.json"));
        assert_eq!(config.limits.max_content_length, 2000);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn rejects_unknown_keys() {
        let toml = r#"
            [gateway]
            prot = 9600
        "#;
        assert!(load_config_from_str(toml).is_err());
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.registry.refresh_interval_secs, 60);
    }

    #[test]
    fn env_key_mapping_splits_on_first_segment_only() {
        // Section fields whose names contain the name of another section
        // must not be split a second time.
        assert_eq!(
            map_env_key("upstream_gateway_token"),
            "upstream.gateway_token"
        );
        assert_eq!(
            map_env_key("upstream_gateway_username"),
            "upstream.gateway_username"
        );
        assert_eq!(
            map_env_key("limits_max_content_length"),
            "limits.max_content_length"
        );
        assert_eq!(map_env_key("gateway_port"), "gateway.port");
    }

    #[test]
    fn env_key_mapping_leaves_top_level_keys_alone() {
        assert_eq!(map_env_key("log_level"), "log_level");
    }
}
