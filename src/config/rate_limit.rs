//! Rate-limit tier configuration.

use super::defaults::{default_rate_limit_max_requests, default_rate_limit_window_ms};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// One sliding-window quota, with an optional secondary burst window
/// (a larger window with a higher ceiling).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RateLimitTier {
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_rate_limit_window_ms")]
    pub window_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_window_ms: Option<u64>,
}

impl Default for RateLimitTier {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max_requests(),
            window_ms: default_rate_limit_window_ms(),
            burst_size: None,
            burst_window_ms: None,
        }
    }
}

impl RateLimitTier {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn burst_window(&self) -> Option<Duration> {
        self.burst_window_ms.map(Duration::from_millis)
    }

    /// Widest window this tier observes; retention horizon for its buckets.
    pub fn horizon(&self) -> Duration {
        self.burst_window().unwrap_or_default().max(self.window())
    }
}

/// The three independent quota tiers plus per-action overrides.
///
/// Lookup priority for an incoming action: client tier, room tier,
/// action override, default.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RateLimitsConfig {
    /// Fallback tier when no more specific tier applies
    #[serde(default)]
    pub default: RateLimitTier,
    /// Quota applied to every client id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_client: Option<RateLimitTier>,
    /// Quota applied to every room code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_room: Option<RateLimitTier>,
    /// Overrides for specific action kinds
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub per_action: HashMap<String, RateLimitTier>,
}

impl RateLimitsConfig {
    pub fn client_tier(&self) -> &RateLimitTier {
        self.per_client.as_ref().unwrap_or(&self.default)
    }

    pub fn room_tier(&self) -> &RateLimitTier {
        self.per_room.as_ref().unwrap_or(&self.default)
    }

    pub fn action_tier(&self, action: &str) -> &RateLimitTier {
        self.per_action.get(action).unwrap_or(&self.default)
    }
}
