//! Root configuration struct.

use super::defaults::{default_cors_origins, default_port, default_shutdown_drain_secs};
use super::logging::LoggingConfig;
use super::protocol::ProtocolConfig;
use super::rate_limit::RateLimitsConfig;
use super::sync::SyncConfig;
use serde::{Deserialize, Serialize};

/// Complete server configuration, loadable from `config.json` with
/// environment-variable overrides for the recognized options.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Comma-separated allowed origins, or "*" for permissive CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
    /// When set, broadcasts fan out through a shared pub/sub adapter so
    /// multiple instances reach each other's connections. The game core
    /// is unaware of this; it only requires that a broadcast reaches
    /// every connection in a room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    /// Bound on graceful-shutdown queue draining (seconds)
    #[serde(default = "default_shutdown_drain_secs")]
    pub shutdown_drain_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            protocol: ProtocolConfig::default(),
            sync: SyncConfig::default(),
            rate_limits: RateLimitsConfig::default(),
            logging: LoggingConfig::default(),
            cors_origins: default_cors_origins(),
            redis_url: None,
            shutdown_drain_secs: default_shutdown_drain_secs(),
        }
    }
}
