//! Room shape and lifetime configuration.

use super::defaults::{
    default_allow_host_handoff, default_disconnect_grace_secs, default_gc_interval_secs,
    default_max_players, default_max_rooms_per_host, default_max_rounds,
    default_room_code_length, default_room_expiration_hours,
};
use serde::{Deserialize, Serialize};

/// Configuration for room codes, capacity, and expiry.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoomConfig {
    /// Length of generated room codes (4-8)
    #[serde(default = "default_room_code_length")]
    pub room_code_length: usize,
    /// TTL applied on room creation (hours, 1-168)
    #[serde(default = "default_room_expiration_hours")]
    pub expiration_hours: u64,
    /// Default player capacity enforced on join (5-100)
    #[serde(default = "default_max_players")]
    pub max_players: usize,
    /// Interval of the expired-room garbage collection pass (seconds)
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Promote the longest-connected player when the host disconnects
    #[serde(default = "default_allow_host_handoff")]
    pub allow_host_handoff: bool,
    /// Quiet period before a silent connection is marked disconnected (seconds)
    #[serde(default = "default_disconnect_grace_secs")]
    pub disconnect_grace_secs: u64,
    /// Cap on concurrently active rooms per host
    #[serde(default = "default_max_rooms_per_host")]
    pub max_rooms_per_host: usize,
    /// Default rounds per game
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            room_code_length: default_room_code_length(),
            expiration_hours: default_room_expiration_hours(),
            max_players: default_max_players(),
            gc_interval_secs: default_gc_interval_secs(),
            allow_host_handoff: default_allow_host_handoff(),
            disconnect_grace_secs: default_disconnect_grace_secs(),
            max_rooms_per_host: default_max_rooms_per_host(),
            max_rounds: default_max_rounds(),
        }
    }
}
