//! Compressed, versioned state captures.
//!
//! One store per room, holding up to a configured number of snapshots;
//! the oldest is evicted beyond that. Payloads are gzip-compressed when
//! enabled, falling back to raw bytes if compression fails. A snapshot
//! supersedes all events at versions at or below its own for recovery.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::protocol::{RoomCode, SnapshotEnvelope, Version};

/// A stored state capture. The store exclusively owns these bytes;
/// clients receive decompressed copies.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub room_code: RoomCode,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub compressed: bool,
    pub data: Vec<u8>,
}

/// Why a snapshot was taken; drives retention decisions and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCause {
    /// The configured number of mutations elapsed
    Interval,
    /// A critical FSM transition (game start, round boundary, game end)
    CriticalTransition,
    /// Explicit request from the sync engine (late join / resync)
    SyncRequest,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("snapshot decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// One room's snapshot collection, ordered by version.
#[derive(Debug)]
pub struct SnapshotStore {
    room_code: RoomCode,
    snapshots: BTreeMap<Version, Snapshot>,
    max_per_room: usize,
    compress: bool,
    last_snapshot_version: Option<Version>,
}

impl SnapshotStore {
    pub fn new(room_code: RoomCode, max_per_room: usize, compress: bool) -> Self {
        Self {
            room_code,
            snapshots: BTreeMap::new(),
            max_per_room: max_per_room.max(1),
            compress,
            last_snapshot_version: None,
        }
    }

    /// Capture `state` at `version`. Oldest snapshot is evicted when the
    /// per-room cap is reached. Compression failures fall back to
    /// storing the raw encoding.
    pub fn capture(
        &mut self,
        version: Version,
        state: &serde_json::Value,
        cause: SnapshotCause,
    ) -> Result<(), SnapshotError> {
        let raw = serde_json::to_vec(state)?;

        let (data, compressed) = if self.compress {
            match gzip(&raw) {
                Ok(packed) => (packed, true),
                Err(error) => {
                    tracing::warn!(
                        room = %self.room_code,
                        version,
                        %error,
                        "snapshot compression failed; storing raw"
                    );
                    (raw, false)
                }
            }
        } else {
            (raw, false)
        };

        let snapshot = Snapshot {
            room_code: self.room_code.clone(),
            version,
            timestamp: Utc::now(),
            compressed,
            data,
        };

        tracing::debug!(
            room = %self.room_code,
            version,
            ?cause,
            compressed,
            bytes = snapshot.data.len(),
            "captured snapshot"
        );

        self.snapshots.insert(version, snapshot);
        self.last_snapshot_version = Some(version);
        while self.snapshots.len() > self.max_per_room {
            if let Some((&oldest, _)) = self.snapshots.iter().next() {
                self.snapshots.remove(&oldest);
            }
        }

        Ok(())
    }

    /// Whether the interval policy calls for a new snapshot at `version`.
    pub fn interval_due(&self, version: Version, interval: u64) -> bool {
        match self.last_snapshot_version {
            Some(last) => version.saturating_sub(last) >= interval,
            None => version >= interval,
        }
    }

    /// Exact-version lookup.
    pub fn at_version(&self, version: Version) -> Option<&Snapshot> {
        self.snapshots.get(&version)
    }

    /// The newest snapshot.
    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.values().next_back()
    }

    /// The newest snapshot at or below `target`; when none qualifies,
    /// the earliest available.
    pub fn closest_at_or_below(&self, target: Version) -> Option<&Snapshot> {
        self.snapshots
            .range(..=target)
            .next_back()
            .map(|(_, snapshot)| snapshot)
            .or_else(|| self.snapshots.values().next())
    }

    /// Decompress a snapshot into its wire envelope. `stale` marks a
    /// snapshot that outlived the replay TTL but was served anyway.
    pub fn to_envelope(
        snapshot: &Snapshot,
        stale: bool,
    ) -> Result<SnapshotEnvelope, SnapshotError> {
        let raw = if snapshot.compressed {
            gunzip(&snapshot.data).map_err(SnapshotError::Decompress)?
        } else {
            snapshot.data.clone()
        };
        let state = serde_json::from_slice(&raw)?;
        Ok(SnapshotEnvelope {
            version: snapshot.version,
            timestamp: snapshot.timestamp,
            state,
            stale,
        })
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.last_snapshot_version = None;
    }
}

fn gzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    encoder.finish()
}

fn gunzip(packed: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(packed);
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;
    Ok(raw)
}
