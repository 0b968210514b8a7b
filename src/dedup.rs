//! Processed-intent deduplication.
//!
//! A TTL'd LRU cache mapping (room, intent id) to the result the
//! pipeline produced the first time, consulted before an intent reaches
//! the plugin. This guarantees at-most-once effect for any intent id
//! across retries: a duplicate submission is answered with the original
//! result and never re-executed. Host idempotency keys are tracked the
//! same way under a separate key space.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::metrics::EngineMetrics;
use crate::protocol::{IntentId, IntentResult, RoomCode};

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
enum DedupKey {
    Intent(RoomCode, IntentId),
    IdempotencyKey(RoomCode, String),
}

struct Entry {
    stored_at: Instant,
    result: IntentResult,
}

/// Shared deduplication store.
#[derive(Clone)]
pub struct DedupStore {
    inner: Arc<Mutex<Inner>>,
    metrics: Arc<EngineMetrics>,
}

struct Inner {
    cache: LruCache<DedupKey, Entry>,
    ttl: Duration,
}

pub const DEFAULT_CAPACITY: usize = 100_000;

impl DedupStore {
    pub fn new(capacity: usize, ttl: Duration, metrics: Arc<EngineMetrics>) -> Self {
        let cache = LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN));
        Self {
            inner: Arc::new(Mutex::new(Inner { cache, ttl })),
            metrics,
        }
    }

    /// The prior result for this intent id, if it was already processed
    /// and has not expired.
    pub fn lookup(&self, room: &RoomCode, intent_id: IntentId) -> Option<IntentResult> {
        self.lookup_key(&DedupKey::Intent(room.clone(), intent_id))
    }

    /// The prior result recorded under a host idempotency key.
    pub fn lookup_idempotency_key(&self, room: &RoomCode, key: &str) -> Option<IntentResult> {
        self.lookup_key(&DedupKey::IdempotencyKey(room.clone(), key.to_string()))
    }

    fn lookup_key(&self, key: &DedupKey) -> Option<IntentResult> {
        let mut inner = self.inner.lock().ok()?;
        let ttl = inner.ttl;
        let hit = match inner.cache.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= ttl => Some(entry.result.clone()),
            Some(_) => {
                inner.cache.pop(key);
                None
            }
            None => None,
        };
        if hit.is_some() {
            self.metrics.dedup_hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Record the result of a processed intent.
    pub fn mark_processed(
        &self,
        room: &RoomCode,
        intent_id: IntentId,
        idempotency_key: Option<&str>,
        result: &IntentResult,
    ) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let now = Instant::now();
        inner.insert(
            DedupKey::Intent(room.clone(), intent_id),
            Entry {
                stored_at: now,
                result: result.clone(),
            },
            &self.metrics,
        );
        if let Some(key) = idempotency_key {
            inner.insert(
                DedupKey::IdempotencyKey(room.clone(), key.to_string()),
                Entry {
                    stored_at: now,
                    result: result.clone(),
                },
                &self.metrics,
            );
        }
    }

    /// Evict expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        let ttl = inner.ttl;
        let mut evicted = 0;
        while let Some((_, entry)) = inner.cache.peek_lru() {
            if entry.stored_at.elapsed() > ttl {
                inner.cache.pop_lru();
                evicted += 1;
            } else {
                break;
            }
        }
        if evicted > 0 {
            self.metrics
                .dedup_evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Drop every entry belonging to a destroyed room.
    pub fn clear_room(&self, room: &RoomCode) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let keys: Vec<DedupKey> = inner
            .cache
            .iter()
            .filter(|(key, _)| match key {
                DedupKey::Intent(code, _) | DedupKey::IdempotencyKey(code, _) => code == room,
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            inner.cache.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn insert(&mut self, key: DedupKey, entry: Entry, metrics: &EngineMetrics) {
        if self.cache.len() == self.cache.cap().get() && self.cache.pop_lru().is_some() {
            metrics.dedup_evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.cache.put(key, entry);
    }
}
