//! Protocol limits: message bounds and client compatibility.

use super::defaults::{
    default_max_action_length, default_max_clock_skew_secs, default_max_intent_data_bytes,
    default_max_message_bytes, default_max_player_name_length,
};
use super::room::RoomConfig;
use serde::{Deserialize, Serialize};

/// Bounds applied during structural message validation.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProtocolConfig {
    /// Room shape constraints (code alphabet length, capacity) shared
    /// with the room runtime
    #[serde(default)]
    pub room: RoomConfig,
    /// Maximum intent action name length
    #[serde(default = "default_max_action_length")]
    pub max_action_length: usize,
    /// Maximum player display name length (characters)
    #[serde(default = "default_max_player_name_length")]
    pub max_player_name_length: usize,
    /// Maximum encoded size of an intent's opaque data
    #[serde(default = "default_max_intent_data_bytes")]
    pub max_intent_data_bytes: usize,
    /// Maximum size of any inbound message frame
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Allowed client clock skew for envelope timestamps (seconds)
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
    /// Oldest client build version accepted at handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_client_version: Option<semver::Version>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            room: RoomConfig::default(),
            max_action_length: default_max_action_length(),
            max_player_name_length: default_max_player_name_length(),
            max_intent_data_bytes: default_max_intent_data_bytes(),
            max_message_bytes: default_max_message_bytes(),
            max_clock_skew_secs: default_max_clock_skew_secs(),
            min_client_version: None,
        }
    }
}
