//! State-synchronization tuning: snapshots, replay, dedup, ACKs, and
//! broadcast cadence.

use super::defaults::{
    default_ack_timeout_ms, default_compress_snapshots, default_dedup_ttl_ms,
    default_max_deltas_between_full, default_min_full_broadcast_gap_ms,
    default_reconnect_token_ttl_secs, default_replay_buffer_capacity,
    default_replay_event_ttl_ms, default_snapshot_interval_versions,
    default_snapshot_max_per_room, default_sync_scan_hz,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of the versioned state-synchronization subsystem.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Minimum version delta between automatic snapshots
    #[serde(default = "default_snapshot_interval_versions")]
    pub snapshot_interval_versions: u64,
    /// Retained snapshots per room; oldest evicted beyond this
    #[serde(default = "default_snapshot_max_per_room")]
    pub snapshot_max_per_room: usize,
    /// Replay buffer capacity in events
    #[serde(default = "default_replay_buffer_capacity")]
    pub replay_buffer_capacity: usize,
    /// TTL of buffered replay events (milliseconds)
    #[serde(default = "default_replay_event_ttl_ms")]
    pub replay_event_ttl_ms: u64,
    /// TTL of processed-intent dedup entries (milliseconds)
    #[serde(default = "default_dedup_ttl_ms")]
    pub dedup_ttl_ms: u64,
    /// How long a broadcast may remain unacknowledged (milliseconds)
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Sync scanner frequency per room
    #[serde(default = "default_sync_scan_hz")]
    pub sync_scan_hz: u32,
    /// Minimum gap between full-state broadcasts (milliseconds);
    /// critical transitions bypass it
    #[serde(default = "default_min_full_broadcast_gap_ms")]
    pub min_full_broadcast_gap_ms: u64,
    /// Delta broadcasts allowed since the last full before forcing a full
    #[serde(default = "default_max_deltas_between_full")]
    pub max_deltas_between_full: u32,
    /// Gzip snapshot payloads (falls back to raw on failure)
    #[serde(default = "default_compress_snapshots")]
    pub compress_snapshots: bool,
    /// Lifetime of reconnect tokens (seconds)
    #[serde(default = "default_reconnect_token_ttl_secs")]
    pub reconnect_token_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            snapshot_interval_versions: default_snapshot_interval_versions(),
            snapshot_max_per_room: default_snapshot_max_per_room(),
            replay_buffer_capacity: default_replay_buffer_capacity(),
            replay_event_ttl_ms: default_replay_event_ttl_ms(),
            dedup_ttl_ms: default_dedup_ttl_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            sync_scan_hz: default_sync_scan_hz(),
            min_full_broadcast_gap_ms: default_min_full_broadcast_gap_ms(),
            max_deltas_between_full: default_max_deltas_between_full(),
            compress_snapshots: default_compress_snapshots(),
            reconnect_token_ttl_secs: default_reconnect_token_ttl_secs(),
        }
    }
}

impl SyncConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn replay_event_ttl(&self) -> Duration {
        Duration::from_millis(self.replay_event_ttl_ms)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }

    pub fn min_full_broadcast_gap(&self) -> Duration {
        Duration::from_millis(self.min_full_broadcast_gap_ms)
    }

    /// Interval between sync scanner ticks, derived from the configured
    /// frequency; a zero frequency degrades to one scan per second.
    pub fn scan_interval(&self) -> Duration {
        let hz = self.sync_scan_hz.max(1);
        Duration::from_millis(1000 / u64::from(hz))
    }
}
