//! Default value functions referenced by `#[serde(default = ...)]`
//! attributes across the configuration types.

pub fn default_port() -> u16 {
    3640
}

// Room defaults

pub fn default_room_code_length() -> usize {
    4
}

pub fn default_room_expiration_hours() -> u64 {
    24
}

pub fn default_max_players() -> usize {
    50
}

pub fn default_gc_interval_secs() -> u64 {
    300
}

pub fn default_allow_host_handoff() -> bool {
    true
}

pub fn default_disconnect_grace_secs() -> u64 {
    60
}

pub fn default_max_rooms_per_host() -> usize {
    4
}

pub fn default_max_rounds() -> u32 {
    5
}

// Protocol limits

pub fn default_max_action_length() -> usize {
    64
}

pub fn default_max_player_name_length() -> usize {
    32
}

pub fn default_max_intent_data_bytes() -> usize {
    16 * 1024
}

pub fn default_max_message_bytes() -> usize {
    64 * 1024
}

pub fn default_max_clock_skew_secs() -> u64 {
    120
}

// Synchronization defaults

pub fn default_snapshot_interval_versions() -> u64 {
    10
}

pub fn default_snapshot_max_per_room() -> usize {
    10
}

pub fn default_replay_buffer_capacity() -> usize {
    100
}

pub fn default_replay_event_ttl_ms() -> u64 {
    3_600_000
}

pub fn default_dedup_ttl_ms() -> u64 {
    3_600_000
}

pub fn default_ack_timeout_ms() -> u64 {
    2_000
}

pub fn default_sync_scan_hz() -> u32 {
    10
}

pub fn default_min_full_broadcast_gap_ms() -> u64 {
    200
}

pub fn default_max_deltas_between_full() -> u32 {
    20
}

pub fn default_compress_snapshots() -> bool {
    true
}

pub fn default_reconnect_token_ttl_secs() -> u64 {
    6 * 3600
}

// Rate limiting defaults

pub fn default_rate_limit_max_requests() -> u32 {
    30
}

pub fn default_rate_limit_window_ms() -> u64 {
    10_000
}

// Misc

pub fn default_cors_origins() -> String {
    "*".to_string()
}

pub fn default_shutdown_drain_secs() -> u64 {
    10
}
