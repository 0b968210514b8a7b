//! Sliding-window rate limiting.
//!
//! Three independent quota tiers are enforced on every inbound action:
//! per client, per room, and per action kind, each optionally paired
//! with a burst window (a larger secondary window with a higher
//! ceiling). The limiter is consulted synchronously before a message
//! reaches the room actor and is purely advisory to every other layer.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{RateLimitTier, RateLimitsConfig};
use crate::metrics::EngineMetrics;
use crate::protocol::{PlayerId, RoomCode};

/// Which tier rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitedBy {
    Client,
    Room,
    Action,
}

/// Rejection detail: the tier that tripped and how long until the
/// oldest counted request leaves the window.
#[derive(Debug, Clone, thiserror::Error)]
#[error("rate limit exceeded ({tier:?}); retry after {retry_after:?}")]
pub struct RateLimited {
    pub tier: LimitedBy,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BucketKey {
    Client(PlayerId),
    Room(RoomCode),
    /// Action kind scoped to the submitting client
    Action(PlayerId, String),
}

/// Timestamps of recent requests for one bucket, pruned to the widest
/// window the governing tier observes.
#[derive(Debug, Default)]
struct Bucket {
    hits: Vec<Instant>,
}

impl Bucket {
    fn prune(&mut self, now: Instant, horizon: Duration) {
        self.hits.retain(|hit| now.duration_since(*hit) < horizon);
    }

    /// Count hits inside `window` ending at `now`.
    fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.hits
            .iter()
            .filter(|hit| now.duration_since(**hit) < window)
            .count()
    }

    /// When the oldest hit inside `window` falls out of it.
    fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        self.hits
            .iter()
            .filter(|hit| now.duration_since(**hit) < window)
            .min()
            .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or_default()
    }

    fn check(&mut self, now: Instant, tier: &RateLimitTier) -> Result<(), Duration> {
        self.prune(now, tier.horizon());

        if self.count_within(now, tier.window()) >= tier.max_requests as usize {
            return Err(self.retry_after(now, tier.window()));
        }
        if let (Some(burst_size), Some(burst_window)) = (tier.burst_size, tier.burst_window()) {
            if self.count_within(now, burst_window) >= burst_size as usize {
                return Err(self.retry_after(now, burst_window));
            }
        }
        Ok(())
    }
}

/// The shared limiter. Buckets are keyed per client, per room, and per
/// (client, action); DashMap shards give lock-per-key behavior.
pub struct RateLimiter {
    config: RateLimitsConfig,
    buckets: DashMap<BucketKey, Bucket>,
    metrics: Arc<EngineMetrics>,
}

impl RateLimiter {
    pub fn new(config: RateLimitsConfig, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            metrics,
        }
    }

    /// Check all applicable tiers for one action and record the hit if
    /// allowed. Tiers are evaluated client, room, action; the first
    /// rejection wins and nothing is recorded.
    pub fn check(
        &self,
        client: PlayerId,
        room: &RoomCode,
        action: &str,
    ) -> Result<(), RateLimited> {
        let now = Instant::now();

        let checks: [(BucketKey, &RateLimitTier, LimitedBy); 3] = [
            (
                BucketKey::Client(client),
                self.config.client_tier(),
                LimitedBy::Client,
            ),
            (
                BucketKey::Room(room.clone()),
                self.config.room_tier(),
                LimitedBy::Room,
            ),
            (
                BucketKey::Action(client, action.to_string()),
                self.config.action_tier(action),
                LimitedBy::Action,
            ),
        ];

        for (key, tier, limited_by) in &checks {
            let mut bucket = self.buckets.entry(key.clone()).or_default();
            if let Err(retry_after) = bucket.check(now, tier) {
                self.metrics
                    .rate_limit_hits
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Err(RateLimited {
                    tier: *limited_by,
                    retry_after,
                });
            }
        }

        // All tiers passed; count the hit against each
        for (key, _, _) in checks {
            if let Some(mut bucket) = self.buckets.get_mut(&key) {
                bucket.hits.push(now);
            }
        }
        Ok(())
    }

    /// Drop buckets whose entire history has aged out. Called from the
    /// periodic GC pass.
    pub fn sweep(&self) {
        let now = Instant::now();
        let widest = self.widest_horizon();
        self.buckets.retain(|_, bucket| {
            bucket.prune(now, widest);
            !bucket.hits.is_empty()
        });
    }

    /// Drop every bucket belonging to a destroyed room.
    pub fn clear_room(&self, room: &RoomCode) {
        self.buckets
            .retain(|key, _| !matches!(key, BucketKey::Room(code) if code == room));
    }

    fn widest_horizon(&self) -> Duration {
        let mut widest = self
            .config
            .default
            .horizon()
            .max(self.config.client_tier().horizon())
            .max(self.config.room_tier().horizon());
        for tier in self.config.per_action.values() {
            widest = widest.max(tier.horizon());
        }
        widest
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn limiter(config: RateLimitsConfig) -> RateLimiter {
        RateLimiter::new(config, Arc::new(EngineMetrics::new()))
    }

    fn tier(max_requests: u32, window_ms: u64) -> RateLimitTier {
        RateLimitTier {
            max_requests,
            window_ms,
            burst_size: None,
            burst_window_ms: None,
        }
    }

    #[test]
    fn test_allows_until_quota_then_rejects() {
        let limiter = limiter(RateLimitsConfig {
            default: tier(3, 60_000),
            ..Default::default()
        });
        let client = Uuid::new_v4();
        let room = "WXYZ".to_string();

        for _ in 0..3 {
            assert!(limiter.check(client, &room, "answer").is_ok());
        }
        let rejection = limiter.check(client, &room, "answer").unwrap_err();
        assert_eq!(rejection.tier, LimitedBy::Client);
        assert!(rejection.retry_after > Duration::ZERO);
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = limiter(RateLimitsConfig {
            default: tier(2, 60_000),
            // Generous room tier so only the client tier binds
            per_room: Some(tier(100, 60_000)),
            ..Default::default()
        });
        let room = "WXYZ".to_string();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(limiter.check(first, &room, "answer").is_ok());
        assert!(limiter.check(first, &room, "answer").is_ok());
        assert!(limiter.check(first, &room, "answer").is_err());

        assert!(limiter.check(second, &room, "answer").is_ok());
    }

    #[test]
    fn test_room_tier_aggregates_across_clients() {
        let limiter = limiter(RateLimitsConfig {
            default: tier(100, 60_000),
            per_room: Some(tier(3, 60_000)),
            ..Default::default()
        });
        let room = "WXYZ".to_string();

        for _ in 0..3 {
            assert!(limiter.check(Uuid::new_v4(), &room, "answer").is_ok());
        }
        let rejection = limiter.check(Uuid::new_v4(), &room, "answer").unwrap_err();
        assert_eq!(rejection.tier, LimitedBy::Room);
    }

    #[test]
    fn test_per_action_override() {
        let mut per_action = std::collections::HashMap::new();
        per_action.insert("start_game".to_string(), tier(1, 60_000));
        let limiter = limiter(RateLimitsConfig {
            default: tier(100, 60_000),
            per_action,
            ..Default::default()
        });
        let client = Uuid::new_v4();
        let room = "WXYZ".to_string();

        assert!(limiter.check(client, &room, "start_game").is_ok());
        let rejection = limiter.check(client, &room, "start_game").unwrap_err();
        assert_eq!(rejection.tier, LimitedBy::Action);
        // Other actions still flow
        assert!(limiter.check(client, &room, "answer").is_ok());
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(RateLimitsConfig {
            default: tier(2, 50),
            ..Default::default()
        });
        let client = Uuid::new_v4();
        let room = "WXYZ".to_string();

        assert!(limiter.check(client, &room, "answer").is_ok());
        assert!(limiter.check(client, &room, "answer").is_ok());
        assert!(limiter.check(client, &room, "answer").is_err());

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check(client, &room, "answer").is_ok());
    }

    #[test]
    fn test_burst_window_caps_sustained_spikes() {
        let limiter = limiter(RateLimitsConfig {
            default: RateLimitTier {
                max_requests: 10,
                window_ms: 30,
                burst_size: Some(12),
                burst_window_ms: Some(10_000),
            },
            ..Default::default()
        });
        let client = Uuid::new_v4();
        let room = "WXYZ".to_string();

        // Two short windows of 10 would pass the primary tier, but the
        // burst ceiling of 12 over the long window stops the second wave
        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.check(client, &room, "answer").is_ok() {
                allowed += 1;
            }
        }
        std::thread::sleep(Duration::from_millis(40));
        for _ in 0..10 {
            if limiter.check(client, &room, "answer").is_ok() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 12);
    }

    #[test]
    fn test_sweep_drops_idle_buckets() {
        let limiter = limiter(RateLimitsConfig {
            default: tier(5, 30),
            ..Default::default()
        });
        let client = Uuid::new_v4();
        let room = "WXYZ".to_string();
        let _ = limiter.check(client, &room, "answer");
        assert!(limiter.bucket_count() > 0);

        std::thread::sleep(Duration::from_millis(40));
        limiter.sweep();
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_clear_room_removes_room_bucket_only() {
        let limiter = limiter(RateLimitsConfig::default());
        let client = Uuid::new_v4();
        let room = "WXYZ".to_string();
        let _ = limiter.check(client, &room, "answer");
        let before = limiter.bucket_count();

        limiter.clear_room(&room);
        assert_eq!(limiter.bucket_count(), before - 1);
    }
}
