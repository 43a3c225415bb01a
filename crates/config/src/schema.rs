use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolcaseConfig {
    /// Root directory all path-taking tools are confined to.
    pub sandbox_root: PathBuf,
    /// Default byte ceiling for file and output reads.
    pub max_read_bytes: usize,
    pub gateway: GatewayConfig,
    pub policy: PolicyConfig,
    pub bridge: BridgeConfig,
}

impl Default for ToolcaseConfig {
    fn default() -> Self {
        Self {
            sandbox_root: PathBuf::from("."),
            max_read_bytes: 200_000,
            gateway: GatewayConfig::default(),
            policy: PolicyConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Bind address. Defaults to loopback for safety.
    pub bind: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

/// Execution policy knobs. The deny lists themselves are fixed in
/// `toolcase-policy`; only the ceilings are configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Maximum timeout a caller may request for an execution, in seconds.
    pub max_timeout_s: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { max_timeout_s: 300 }
    }
}

/// Stdio bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Base URL of the gateway the bridge proxies to.
    pub base_url: String,
    /// Tool cache time-to-live in seconds. Zero disables caching.
    pub tools_cache_ttl_s: f64,
    /// Per-call timeout for backend HTTP requests, in seconds.
    pub backend_timeout_s: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            tools_cache_ttl_s: 5.0,
            backend_timeout_s: 10,
        }
    }
}
