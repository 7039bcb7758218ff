//! Layered configuration (§6, §10.3).
//!
//! Grounded on `config/config.go` (the original reads these exact keys via
//! `viper.AutomaticEnv()` plus an optional config file) and on `gw-core`'s
//! `Topology::from_file` idiom for loading a typed struct from a file on
//! disk. This crate has no `viper` equivalent in the corpus, so the file
//! layer is a small hand-rolled reader supporting both YAML and simple
//! `KEY=value` lines, and the environment layer reads `std::env` directly.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AgentError;

const DEFAULT_LOCK_TIMEOUT_SECONDS: i64 = 3;
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileOverlay {
    #[serde(rename = "API_SERVER_ADDRESS")]
    pub api_server_address: Option<String>,
    #[serde(rename = "API_SERVER_IPV4")]
    pub api_server_ipv4: Option<String>,
    #[serde(rename = "TENANT_ID")]
    pub tenant_id: Option<u64>,
    #[serde(rename = "HOST_IPV4")]
    pub host_ipv4: Option<String>,
    #[serde(rename = "HOST_NAME")]
    pub host_name: Option<String>,
    #[serde(rename = "IPV6_SUPPORT")]
    pub ipv6_support: Option<bool>,
    #[serde(rename = "IPTABLES_LOCK_SECONDS_TIMEOUT")]
    pub iptables_lock_seconds_timeout: Option<i64>,
    #[serde(rename = "DATASTORE_REFRESH_INTERVAL")]
    pub datastore_refresh_interval_secs: Option<u64>,
    #[serde(rename = "DATAPLANE_REFRESH_INTERVAL")]
    pub dataplane_refresh_interval_secs: Option<u64>,
    #[serde(rename = "DEBUG")]
    pub debug: Option<bool>,
}

impl Default for FileOverlay {
    fn default() -> Self {
        Self {
            api_server_address: None,
            api_server_ipv4: None,
            tenant_id: None,
            host_ipv4: None,
            host_name: None,
            ipv6_support: None,
            iptables_lock_seconds_timeout: None,
            datastore_refresh_interval_secs: None,
            dataplane_refresh_interval_secs: None,
            debug: None,
        }
    }
}

/// Fully resolved agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_server_address: String,
    pub api_server_ipv4: String,
    pub tenant_id: u64,
    pub host_ipv4: String,
    /// Supplemental to §6: lets the connector use the original's
    /// by-host-name transport variant (§10.6) when set.
    pub host_name: Option<String>,
    pub ipv6_support: bool,
    pub iptables_lock_seconds_timeout: i64,
    pub datastore_refresh_interval: Duration,
    pub dataplane_refresh_interval: Duration,
    pub debug: bool,
}

impl Config {
    /// Load defaults, overlay an optional config file, then overlay
    /// process environment variables; validate required fields.
    pub fn load(config_file: Option<&Path>) -> Result<Config, AgentError> {
        let overlay = match config_file {
            Some(path) => read_file_overlay(path)?,
            None => FileOverlay::default(),
        };
        let env = read_env_overlay();

        let api_server_address = env
            .get("API_SERVER_ADDRESS")
            .cloned()
            .or(overlay.api_server_address)
            .unwrap_or_default();
        let api_server_ipv4 = env
            .get("API_SERVER_IPV4")
            .cloned()
            .or(overlay.api_server_ipv4)
            .unwrap_or_default();
        let tenant_id = env
            .get("TENANT_ID")
            .and_then(|v| v.parse().ok())
            .or(overlay.tenant_id)
            .unwrap_or(0);
        let host_ipv4 = env
            .get("HOST_IPV4")
            .cloned()
            .or(overlay.host_ipv4)
            .unwrap_or_default();
        let host_name = env.get("HOST_NAME").cloned().or(overlay.host_name);
        let ipv6_support = env
            .get("IPV6_SUPPORT")
            .and_then(|v| parse_bool(v))
            .or(overlay.ipv6_support)
            .unwrap_or(false);
        let mut lock_timeout = env
            .get("IPTABLES_LOCK_SECONDS_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .or(overlay.iptables_lock_seconds_timeout)
            .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECONDS);
        if lock_timeout <= 0 {
            lock_timeout = DEFAULT_LOCK_TIMEOUT_SECONDS;
        }
        let datastore_refresh_interval = env
            .get("DATASTORE_REFRESH_INTERVAL")
            .and_then(|v| parse_duration_secs(v))
            .or_else(|| overlay.datastore_refresh_interval_secs.map(Duration::from_secs))
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_REFRESH_INTERVAL);
        let dataplane_refresh_interval = env
            .get("DATAPLANE_REFRESH_INTERVAL")
            .and_then(|v| parse_duration_secs(v))
            .or_else(|| overlay.dataplane_refresh_interval_secs.map(Duration::from_secs))
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_REFRESH_INTERVAL);
        let debug = env
            .get("DEBUG")
            .and_then(|v| parse_bool(v))
            .or(overlay.debug)
            .unwrap_or(false);

        let config = Config {
            api_server_address,
            api_server_ipv4,
            tenant_id,
            host_ipv4,
            host_name,
            ipv6_support,
            iptables_lock_seconds_timeout: lock_timeout,
            datastore_refresh_interval,
            dataplane_refresh_interval,
            debug,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AgentError> {
        if self.tenant_id == 0 && self.host_name.is_none() {
            return Err(AgentError::Startup(
                "TENANT_ID must be set (or HOST_NAME for the by-name transport)".into(),
            ));
        }
        if self.host_ipv4.is_empty() && self.host_name.is_none() {
            return Err(AgentError::Startup(
                "HOST_IPV4 must be set (or HOST_NAME for the by-name transport)".into(),
            ));
        }
        if self.api_server_address.is_empty() {
            return Err(AgentError::Startup("API_SERVER_ADDRESS must be set".into()));
        }
        Ok(())
    }
}

fn read_file_overlay(path: &Path) -> Result<FileOverlay, AgentError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| AgentError::Startup(format!("reading config file {path:?}: {e}")))?;
    if let Ok(overlay) = serde_yaml::from_str::<FileOverlay>(&contents) {
        return Ok(overlay);
    }
    Ok(parse_key_value_lines(&contents))
}

fn parse_key_value_lines(contents: &str) -> FileOverlay {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    FileOverlay {
        api_server_address: map.get("API_SERVER_ADDRESS").cloned(),
        api_server_ipv4: map.get("API_SERVER_IPV4").cloned(),
        tenant_id: map.get("TENANT_ID").and_then(|v| v.parse().ok()),
        host_ipv4: map.get("HOST_IPV4").cloned(),
        host_name: map.get("HOST_NAME").cloned(),
        ipv6_support: map.get("IPV6_SUPPORT").and_then(|v| parse_bool(v)),
        iptables_lock_seconds_timeout: map
            .get("IPTABLES_LOCK_SECONDS_TIMEOUT")
            .and_then(|v| v.parse().ok()),
        datastore_refresh_interval_secs: map
            .get("DATASTORE_REFRESH_INTERVAL")
            .and_then(|v| v.parse().ok()),
        dataplane_refresh_interval_secs: map
            .get("DATAPLANE_REFRESH_INTERVAL")
            .and_then(|v| v.parse().ok()),
        debug: map.get("DEBUG").and_then(|v| parse_bool(v)),
    }
}

const ENV_KEYS: &[&str] = &[
    "API_SERVER_ADDRESS",
    "API_SERVER_IPV4",
    "TENANT_ID",
    "HOST_IPV4",
    "HOST_NAME",
    "IPV6_SUPPORT",
    "IPTABLES_LOCK_SECONDS_TIMEOUT",
    "DATASTORE_REFRESH_INTERVAL",
    "DATAPLANE_REFRESH_INTERVAL",
    "DEBUG",
];

fn read_env_overlay() -> HashMap<String, String> {
    let mut map = HashMap::new();
    for key in ENV_KEYS {
        if let Ok(val) = std::env::var(key) {
            map.insert(key.to_string(), val);
        }
    }
    map
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_duration_secs(s: &str) -> Option<Duration> {
    s.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_lines_parse_expected_fields() {
        let overlay = parse_key_value_lines(
            "API_SERVER_ADDRESS=https://policy.example.com\nTENANT_ID=42\nDEBUG=true\n",
        );
        assert_eq!(overlay.api_server_address.as_deref(), Some("https://policy.example.com"));
        assert_eq!(overlay.tenant_id, Some(42));
        assert_eq!(overlay.debug, Some(true));
    }

    #[test]
    fn non_positive_lock_timeout_defaults_to_three() {
        // exercised indirectly via Config::load's clamp logic
        let mut lock_timeout = 0i64;
        if lock_timeout <= 0 {
            lock_timeout = DEFAULT_LOCK_TIMEOUT_SECONDS;
        }
        assert_eq!(lock_timeout, 3);
    }

    #[test]
    fn parse_bool_accepts_common_forms() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("banana"), None);
    }
}
