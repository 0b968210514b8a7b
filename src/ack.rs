//! Per-version acknowledgement tracking.
//!
//! Every versioned broadcast registers its intended recipients. Each
//! inbound ACK clears the sender from that version's pending set and
//! records delivery latency when the client supplied its send time.
//! Versions still pending past the timeout move to the missing set and
//! trigger a targeted resync. Every registered pending set is
//! eventually resolved, timed out, or discarded with the room, so
//! nothing is left orphaned.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::EngineMetrics;
use crate::protocol::{PlayerId, Version};

#[derive(Debug)]
struct PendingBroadcast {
    recipients: HashSet<PlayerId>,
    registered_at: Instant,
    message_type: &'static str,
}

/// One recipient that timed out on one or more versions and needs a
/// resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaggingRecipient {
    pub player_id: PlayerId,
    pub missing_versions: Vec<Version>,
}

/// Per-room ACK bookkeeping. Owned by the sync engine.
#[derive(Debug)]
pub struct AckTracker {
    pending: BTreeMap<Version, PendingBroadcast>,
    received: HashMap<PlayerId, BTreeSet<Version>>,
    missing: HashMap<PlayerId, BTreeSet<Version>>,
    metrics: Arc<EngineMetrics>,
    total_sent: u64,
    total_acked: u64,
    total_missing: u64,
}

impl AckTracker {
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        Self {
            pending: BTreeMap::new(),
            received: HashMap::new(),
            missing: HashMap::new(),
            metrics,
            total_sent: 0,
            total_acked: 0,
            total_missing: 0,
        }
    }

    /// Register the recipient set of a broadcast at `version`.
    /// Broadcasting the same version again (resync) merges recipients
    /// and restarts the timeout clock.
    pub fn register_broadcast(
        &mut self,
        version: Version,
        recipients: impl IntoIterator<Item = PlayerId>,
        message_type: &'static str,
    ) {
        let recipients: HashSet<PlayerId> = recipients.into_iter().collect();
        if recipients.is_empty() {
            return;
        }
        let count = recipients.len() as u64;
        self.total_sent += count;
        self.metrics.acks_expected.fetch_add(count, Ordering::Relaxed);

        match self.pending.get_mut(&version) {
            Some(existing) => {
                existing.recipients.extend(recipients);
                existing.registered_at = Instant::now();
            }
            None => {
                self.pending.insert(
                    version,
                    PendingBroadcast {
                        recipients,
                        registered_at: Instant::now(),
                        message_type,
                    },
                );
            }
        }
    }

    /// Process an inbound ACK. Returns true when the sender was
    /// actually pending at this version.
    pub fn acknowledge(
        &mut self,
        player_id: PlayerId,
        version: Version,
        client_timestamp: Option<DateTime<Utc>>,
    ) -> bool {
        let Some(broadcast) = self.pending.get_mut(&version) else {
            return false;
        };
        if !broadcast.recipients.remove(&player_id) {
            return false;
        }

        self.total_acked += 1;
        self.metrics.acks_received.fetch_add(1, Ordering::Relaxed);

        if let Some(sent_at) = client_timestamp {
            let latency = Utc::now().signed_duration_since(sent_at);
            if let Ok(duration) = latency.to_std() {
                self.metrics
                    .record_ack_latency_micros(duration.as_micros() as u64);
            }
        }

        self.received.entry(player_id).or_default().insert(version);
        self.missing
            .entry(player_id)
            .or_default()
            .remove(&version);

        if broadcast.recipients.is_empty() {
            self.pending.remove(&version);
        }
        true
    }

    /// Move recipients of versions pending longer than `timeout` into
    /// the missing set, returning the recipients that now need resync.
    pub fn expire(&mut self, timeout: Duration) -> Vec<LaggingRecipient> {
        let now = Instant::now();
        let expired_versions: Vec<Version> = self
            .pending
            .iter()
            .filter(|(_, broadcast)| now.duration_since(broadcast.registered_at) >= timeout)
            .map(|(&version, _)| version)
            .collect();

        let mut lagging: HashMap<PlayerId, Vec<Version>> = HashMap::new();
        for version in expired_versions {
            if let Some(broadcast) = self.pending.remove(&version) {
                for player_id in broadcast.recipients {
                    tracing::debug!(
                        %player_id,
                        version,
                        message_type = broadcast.message_type,
                        "ack timed out"
                    );
                    self.total_missing += 1;
                    self.metrics.acks_missing.fetch_add(1, Ordering::Relaxed);
                    self.missing.entry(player_id).or_default().insert(version);
                    lagging.entry(player_id).or_default().push(version);
                }
            }
        }

        let mut result: Vec<LaggingRecipient> = lagging
            .into_iter()
            .map(|(player_id, mut versions)| {
                versions.sort_unstable();
                LaggingRecipient {
                    player_id,
                    missing_versions: versions,
                }
            })
            .collect();
        result.sort_by_key(|recipient| recipient.player_id);
        result
    }

    /// Forget a recipient entirely (player left or room destroyed their
    /// membership). Their pending entries are abandoned, not counted as
    /// missing.
    pub fn forget_recipient(&mut self, player_id: PlayerId) {
        self.received.remove(&player_id);
        self.missing.remove(&player_id);
        let emptied: Vec<Version> = self
            .pending
            .iter_mut()
            .filter_map(|(&version, broadcast)| {
                broadcast.recipients.remove(&player_id);
                broadcast.recipients.is_empty().then_some(version)
            })
            .collect();
        for version in emptied {
            self.pending.remove(&version);
        }
    }

    /// Drop bookkeeping below `floor` to bound memory as versions grow.
    pub fn prune_below(&mut self, floor: Version) {
        for versions in self.received.values_mut() {
            *versions = versions.split_off(&floor);
        }
        for versions in self.missing.values_mut() {
            *versions = versions.split_off(&floor);
        }
        self.received.retain(|_, versions| !versions.is_empty());
        self.missing.retain(|_, versions| !versions.is_empty());
    }

    /// Versions a recipient has acknowledged.
    pub fn acknowledged_versions(&self, player_id: PlayerId) -> Vec<Version> {
        self.received
            .get(&player_id)
            .map(|versions| versions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Highest version this recipient has acknowledged, if any.
    pub fn last_acknowledged(&self, player_id: PlayerId) -> Option<Version> {
        self.received
            .get(&player_id)
            .and_then(|versions| versions.iter().next_back().copied())
    }

    pub fn pending_recipients(&self, version: Version) -> usize {
        self.pending
            .get(&version)
            .map(|broadcast| broadcast.recipients.len())
            .unwrap_or(0)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Room-level ACK statistics: (sent, acked, missing, ack rate).
    pub fn stats(&self) -> (u64, u64, u64, f64) {
        let rate = if self.total_sent == 0 {
            1.0
        } else {
            self.total_acked as f64 / self.total_sent as f64
        };
        (self.total_sent, self.total_acked, self.total_missing, rate)
    }

    /// Discard everything. Called on room destruction so no pending set
    /// outlives the room.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.received.clear();
        self.missing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tracker() -> AckTracker {
        AckTracker::new(Arc::new(EngineMetrics::new()))
    }

    #[test]
    fn test_register_and_full_acknowledgement() {
        let mut tracker = tracker();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        tracker.register_broadcast(8, [p1, p2], "state_sync");
        assert_eq!(tracker.pending_recipients(8), 2);

        assert!(tracker.acknowledge(p1, 8, None));
        assert!(tracker.acknowledge(p2, 8, None));
        assert_eq!(tracker.pending_recipients(8), 0);
        assert!(!tracker.has_pending());
        assert_eq!(tracker.last_acknowledged(p1), Some(8));
    }

    #[test]
    fn test_duplicate_or_unknown_ack_ignored() {
        let mut tracker = tracker();
        let p1 = Uuid::new_v4();
        tracker.register_broadcast(8, [p1], "state_sync");

        assert!(tracker.acknowledge(p1, 8, None));
        assert!(!tracker.acknowledge(p1, 8, None));
        assert!(!tracker.acknowledge(p1, 99, None));
        assert!(!tracker.acknowledge(Uuid::new_v4(), 8, None));
    }

    #[test]
    fn test_expire_moves_silent_recipients_to_missing() {
        let mut tracker = tracker();
        let responsive = Uuid::new_v4();
        let silent = Uuid::new_v4();
        tracker.register_broadcast(9, [responsive, silent], "state_sync");
        tracker.acknowledge(responsive, 9, None);

        let lagging = tracker.expire(Duration::ZERO);
        assert_eq!(lagging.len(), 1);
        assert_eq!(lagging[0].player_id, silent);
        assert_eq!(lagging[0].missing_versions, vec![9]);
        // Expired version is no longer pending
        assert!(!tracker.has_pending());
    }

    #[test]
    fn test_expire_respects_timeout() {
        let mut tracker = tracker();
        let p1 = Uuid::new_v4();
        tracker.register_broadcast(9, [p1], "state_sync");
        let lagging = tracker.expire(Duration::from_secs(60));
        assert!(lagging.is_empty());
        assert!(tracker.has_pending());
    }

    #[test]
    fn test_multiple_missed_versions_grouped_per_recipient() {
        let mut tracker = tracker();
        let silent = Uuid::new_v4();
        tracker.register_broadcast(8, [silent], "state_sync");
        tracker.register_broadcast(9, [silent], "state_sync");
        tracker.register_broadcast(10, [silent], "event");

        let lagging = tracker.expire(Duration::ZERO);
        assert_eq!(lagging.len(), 1);
        assert_eq!(lagging[0].missing_versions, vec![8, 9, 10]);
    }

    #[test]
    fn test_ack_after_timeout_clears_missing() {
        let mut tracker = tracker();
        let p1 = Uuid::new_v4();
        tracker.register_broadcast(9, [p1], "state_sync");
        let _ = tracker.expire(Duration::ZERO);

        // Resync re-registers the version; this time the client answers
        tracker.register_broadcast(9, [p1], "replay_response");
        assert!(tracker.acknowledge(p1, 9, None));
        assert!(tracker.missing.get(&p1).map(BTreeSet::is_empty).unwrap_or(true));
    }

    #[test]
    fn test_forget_recipient_abandons_pending() {
        let mut tracker = tracker();
        let leaver = Uuid::new_v4();
        let stayer = Uuid::new_v4();
        tracker.register_broadcast(9, [leaver, stayer], "state_sync");

        tracker.forget_recipient(leaver);
        assert_eq!(tracker.pending_recipients(9), 1);

        let lagging = tracker.expire(Duration::ZERO);
        assert_eq!(lagging.len(), 1);
        assert_eq!(lagging[0].player_id, stayer);
    }

    #[test]
    fn test_prune_below_bounds_history() {
        let mut tracker = tracker();
        let p1 = Uuid::new_v4();
        for version in 1..=20 {
            tracker.register_broadcast(version, [p1], "state_sync");
            tracker.acknowledge(p1, version, None);
        }
        tracker.prune_below(15);
        assert_eq!(tracker.acknowledged_versions(p1), vec![15, 16, 17, 18, 19, 20]);
    }

    #[test]
    fn test_stats_rate() {
        let mut tracker = tracker();
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        tracker.register_broadcast(1, [p1, p2], "state_sync");
        tracker.acknowledge(p1, 1, None);
        let _ = tracker.expire(Duration::ZERO);

        let (sent, acked, missing, rate) = tracker.stats();
        assert_eq!(sent, 2);
        assert_eq!(acked, 1);
        assert_eq!(missing, 1);
        assert!((rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_latency_recorded_from_client_timestamp() {
        let metrics = Arc::new(EngineMetrics::new());
        let mut tracker = AckTracker::new(metrics.clone());
        let p1 = Uuid::new_v4();
        tracker.register_broadcast(1, [p1], "state_sync");
        tracker.acknowledge(p1, 1, Some(Utc::now() - chrono::Duration::milliseconds(15)));

        let latency = metrics.snapshot().acks.latency.expect("histogram");
        assert_eq!(latency.samples, 1);
        assert!(latency.max_ms >= 14.0);
    }
}
