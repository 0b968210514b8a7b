//! Bounded, time-ordered per-room event log.
//!
//! Append-only source of truth for catch-up between a snapshot and the
//! current state: a lagging client receives the closest snapshot plus
//! the buffered events after it. Oldest events are evicted at capacity
//! and by TTL.

use chrono::{Duration, Utc};
use std::collections::VecDeque;

use crate::protocol::{Event, Version};

/// One room's replay log.
#[derive(Debug)]
pub struct ReplayBuffer {
    events: VecDeque<Event>,
    capacity: usize,
    ttl: Duration,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, ttl: std::time::Duration) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1)),
        }
    }

    /// Append an event, evicting the oldest when full. Events must
    /// arrive in version order; out-of-order appends are rejected.
    pub fn append(&mut self, event: Event) -> bool {
        if let Some(last) = self.events.back() {
            if event.version <= last.version {
                tracing::warn!(
                    last_version = last.version,
                    event_version = event.version,
                    "rejected out-of-order replay append"
                );
                return false;
            }
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        true
    }

    /// All buffered events, oldest first.
    pub fn all(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Events with `version > after`, oldest first.
    pub fn events_after(&self, after: Version) -> Vec<Event> {
        self.events
            .iter()
            .filter(|event| event.version > after)
            .cloned()
            .collect()
    }

    /// Events with version in `[from, to]`, oldest first.
    pub fn events_in_range(&self, from: Version, to: Version) -> Vec<Event> {
        self.events
            .iter()
            .filter(|event| event.version >= from && event.version <= to)
            .cloned()
            .collect()
    }

    /// The newest buffered event.
    pub fn latest(&self) -> Option<&Event> {
        self.events.back()
    }

    /// Version of the newest buffered event.
    pub fn latest_version(&self) -> Option<Version> {
        self.events.back().map(|event| event.version)
    }

    /// Version of the oldest buffered event, i.e. how far back this
    /// buffer can replay.
    pub fn oldest_version(&self) -> Option<Version> {
        self.events.front().map(|event| event.version)
    }

    /// Drop events older than the TTL. Returns how many were removed.
    pub fn evict_expired(&mut self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let before = self.events.len();
        while let Some(front) = self.events.front() {
            if front.timestamp < cutoff {
                self.events.pop_front();
            } else {
                break;
            }
        }
        before - self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(version: Version) -> Event {
        Event {
            id: Uuid::new_v4(),
            kind: "test".to_string(),
            room_code: "WXYZ".to_string(),
            timestamp: Utc::now(),
            version,
            data: serde_json::Value::Null,
            intent_id: None,
        }
    }

    fn buffer(capacity: usize) -> ReplayBuffer {
        ReplayBuffer::new(capacity, std::time::Duration::from_secs(3600))
    }

    #[test]
    fn test_append_and_read_all_in_order() {
        let mut buffer = buffer(10);
        for version in 1..=5 {
            assert!(buffer.append(event(version)));
        }
        let all = buffer.all();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|pair| pair[0].version < pair[1].version));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut buffer = buffer(3);
        for version in 1..=5 {
            buffer.append(event(version));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.oldest_version(), Some(3));
        assert_eq!(buffer.latest_version(), Some(5));
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let mut buffer = buffer(10);
        assert!(buffer.append(event(5)));
        assert!(!buffer.append(event(5)));
        assert!(!buffer.append(event(4)));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_events_after_version() {
        let mut buffer = buffer(10);
        for version in 1..=6 {
            buffer.append(event(version));
        }
        let tail = buffer.events_after(4);
        assert_eq!(
            tail.iter().map(|e| e.version).collect::<Vec<_>>(),
            vec![5, 6]
        );
        assert!(buffer.events_after(6).is_empty());
    }

    #[test]
    fn test_events_in_range_inclusive() {
        let mut buffer = buffer(10);
        for version in 1..=6 {
            buffer.append(event(version));
        }
        let slice = buffer.events_in_range(2, 4);
        assert_eq!(
            slice.iter().map(|e| e.version).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn test_ttl_eviction() {
        let mut buffer = ReplayBuffer::new(10, std::time::Duration::from_millis(10));
        let mut old = event(1);
        old.timestamp = Utc::now() - Duration::seconds(5);
        buffer.append(old);
        buffer.append(event(2));

        assert_eq!(buffer.evict_expired(), 1);
        assert_eq!(buffer.oldest_version(), Some(2));
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut buffer = buffer(10);
        buffer.append(event(1));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
    }
}
