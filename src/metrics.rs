//! Engine metrics: counters, ACK latency percentiles, and export in
//! JSON and Prometheus line formats.
//!
//! Counters are plain atomics so the hot paths never take a lock; only
//! the latency histogram sits behind a mutex, held for single-record
//! spans and never across an await.

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const LATENCY_LOWEST_DISCERNIBLE_MICROS: u64 = 1;
const LATENCY_HIGHEST_TRACKABLE_MICROS: u64 = 60_000_000; // one minute
const LATENCY_SIGNIFICANT_FIGURES: u8 = 3;

/// Metrics shared by every room and the dispatcher.
#[derive(Debug)]
pub struct EngineMetrics {
    // Room lifecycle
    pub rooms_created: AtomicU64,
    pub rooms_expired: AtomicU64,
    pub rooms_deleted: AtomicU64,
    pub rooms_restored: AtomicU64,

    // Intent pipeline
    pub intents_received: AtomicU64,
    pub intents_rejected: AtomicU64,
    pub intents_duplicate: AtomicU64,
    pub events_applied: AtomicU64,

    // State synchronization
    pub snapshots_created: AtomicU64,
    pub snapshot_compression_failures: AtomicU64,
    pub full_broadcasts: AtomicU64,
    pub delta_broadcasts: AtomicU64,
    pub roster_broadcasts: AtomicU64,
    pub resyncs_sent: AtomicU64,
    pub replay_requests: AtomicU64,

    // ACK tracking
    pub acks_expected: AtomicU64,
    pub acks_received: AtomicU64,
    pub acks_missing: AtomicU64,
    pub ack_latency_clamped_samples: AtomicU64,

    // Boundary rejections
    pub validation_failures: AtomicU64,
    pub rate_limit_hits: AtomicU64,
    pub unauthorized_rejections: AtomicU64,
    pub internal_errors: AtomicU64,

    // Dedup cache
    pub dedup_hits: AtomicU64,
    pub dedup_evictions: AtomicU64,

    /// ACK delivery latency in microseconds; None only if histogram
    /// construction failed (should not happen with these bounds)
    ack_latency: Mutex<Option<Histogram<u64>>>,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(
            LATENCY_LOWEST_DISCERNIBLE_MICROS,
            LATENCY_HIGHEST_TRACKABLE_MICROS,
            LATENCY_SIGNIFICANT_FIGURES,
        )
        .ok();

        Self {
            rooms_created: AtomicU64::new(0),
            rooms_expired: AtomicU64::new(0),
            rooms_deleted: AtomicU64::new(0),
            rooms_restored: AtomicU64::new(0),
            intents_received: AtomicU64::new(0),
            intents_rejected: AtomicU64::new(0),
            intents_duplicate: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            snapshots_created: AtomicU64::new(0),
            snapshot_compression_failures: AtomicU64::new(0),
            full_broadcasts: AtomicU64::new(0),
            delta_broadcasts: AtomicU64::new(0),
            roster_broadcasts: AtomicU64::new(0),
            resyncs_sent: AtomicU64::new(0),
            replay_requests: AtomicU64::new(0),
            acks_expected: AtomicU64::new(0),
            acks_received: AtomicU64::new(0),
            acks_missing: AtomicU64::new(0),
            ack_latency_clamped_samples: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            unauthorized_rejections: AtomicU64::new(0),
            internal_errors: AtomicU64::new(0),
            dedup_hits: AtomicU64::new(0),
            dedup_evictions: AtomicU64::new(0),
            ack_latency: Mutex::new(histogram),
        }
    }

    /// Record one ACK delivery latency sample. Values beyond the
    /// trackable bound are clamped and counted separately.
    pub fn record_ack_latency_micros(&self, micros: u64) {
        let clamped = micros.min(LATENCY_HIGHEST_TRACKABLE_MICROS);
        if clamped != micros {
            self.ack_latency_clamped_samples
                .fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut guard) = self.ack_latency.lock() {
            if let Some(histogram) = guard.as_mut() {
                let _ = histogram.record(clamped);
            }
        }
    }

    /// Snapshot every counter for export.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        let acks_expected = load(&self.acks_expected);
        let acks_received = load(&self.acks_received);
        let ack_rate = if acks_expected == 0 {
            1.0
        } else {
            acks_received as f64 / acks_expected as f64
        };

        let latency = self
            .ack_latency
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(LatencyMetrics::from_histogram));

        MetricsSnapshot {
            timestamp: chrono::Utc::now(),
            rooms: RoomCounters {
                created: load(&self.rooms_created),
                expired: load(&self.rooms_expired),
                deleted: load(&self.rooms_deleted),
                restored: load(&self.rooms_restored),
            },
            intents: IntentCounters {
                received: load(&self.intents_received),
                rejected: load(&self.intents_rejected),
                duplicate: load(&self.intents_duplicate),
                events_applied: load(&self.events_applied),
            },
            sync: SyncCounters {
                snapshots_created: load(&self.snapshots_created),
                snapshot_compression_failures: load(&self.snapshot_compression_failures),
                full_broadcasts: load(&self.full_broadcasts),
                delta_broadcasts: load(&self.delta_broadcasts),
                roster_broadcasts: load(&self.roster_broadcasts),
                resyncs_sent: load(&self.resyncs_sent),
                replay_requests: load(&self.replay_requests),
            },
            acks: AckCounters {
                expected: acks_expected,
                received: acks_received,
                missing: load(&self.acks_missing),
                rate: ack_rate,
                latency,
                clamped_samples: load(&self.ack_latency_clamped_samples),
            },
            rejections: RejectionCounters {
                validation_failures: load(&self.validation_failures),
                rate_limit_hits: load(&self.rate_limit_hits),
                unauthorized: load(&self.unauthorized_rejections),
                internal_errors: load(&self.internal_errors),
            },
            dedup: DedupCounters {
                hits: load(&self.dedup_hits),
                evictions: load(&self.dedup_evictions),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub rooms: RoomCounters,
    pub intents: IntentCounters,
    pub sync: SyncCounters,
    pub acks: AckCounters,
    pub rejections: RejectionCounters,
    pub dedup: DedupCounters,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct RoomCounters {
    pub created: u64,
    pub expired: u64,
    pub deleted: u64,
    pub restored: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct IntentCounters {
    pub received: u64,
    pub rejected: u64,
    pub duplicate: u64,
    pub events_applied: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct SyncCounters {
    pub snapshots_created: u64,
    pub snapshot_compression_failures: u64,
    pub full_broadcasts: u64,
    pub delta_broadcasts: u64,
    pub roster_broadcasts: u64,
    pub resyncs_sent: u64,
    pub replay_requests: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct AckCounters {
    pub expected: u64,
    pub received: u64,
    pub missing: u64,
    pub rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyMetrics>,
    pub clamped_samples: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct LatencyMetrics {
    pub samples: u64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencyMetrics {
    fn from_histogram(histogram: &Histogram<u64>) -> Self {
        let to_ms = |micros: u64| micros as f64 / 1000.0;
        Self {
            samples: histogram.len(),
            mean_ms: histogram.mean() / 1000.0,
            p50_ms: to_ms(histogram.value_at_quantile(0.50)),
            p95_ms: to_ms(histogram.value_at_quantile(0.95)),
            p99_ms: to_ms(histogram.value_at_quantile(0.99)),
            max_ms: to_ms(histogram.max()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct RejectionCounters {
    pub validation_failures: u64,
    pub rate_limit_hits: u64,
    pub unauthorized: u64,
    pub internal_errors: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct DedupCounters {
    pub hits: u64,
    pub evictions: u64,
}

impl MetricsSnapshot {
    /// Render in the Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);
        let mut gauge = |name: &str, help: &str, value: f64| {
            out.push_str(&format!(
                "# HELP parlor_{name} {help}\n# TYPE parlor_{name} gauge\nparlor_{name} {value}\n"
            ));
        };

        gauge("rooms_created_total", "Rooms created", self.rooms.created as f64);
        gauge("rooms_expired_total", "Rooms expired by TTL", self.rooms.expired as f64);
        gauge("rooms_deleted_total", "Rooms explicitly deleted", self.rooms.deleted as f64);
        gauge("intents_received_total", "Intents received", self.intents.received as f64);
        gauge("intents_rejected_total", "Intents rejected", self.intents.rejected as f64);
        gauge("intents_duplicate_total", "Duplicate intents", self.intents.duplicate as f64);
        gauge("events_applied_total", "Events applied", self.intents.events_applied as f64);
        gauge("snapshots_created_total", "Snapshots created", self.sync.snapshots_created as f64);
        gauge("full_broadcasts_total", "Full state broadcasts", self.sync.full_broadcasts as f64);
        gauge("delta_broadcasts_total", "Delta state broadcasts", self.sync.delta_broadcasts as f64);
        gauge("resyncs_sent_total", "Resyncs sent", self.sync.resyncs_sent as f64);
        gauge("acks_expected_total", "ACKs expected", self.acks.expected as f64);
        gauge("acks_received_total", "ACKs received", self.acks.received as f64);
        gauge("acks_missing_total", "ACKs timed out", self.acks.missing as f64);
        gauge("ack_rate", "Fraction of expected ACKs received", self.acks.rate);
        gauge(
            "rate_limit_hits_total",
            "Requests rejected by the rate limiter",
            self.rejections.rate_limit_hits as f64,
        );
        gauge(
            "validation_failures_total",
            "Messages failing validation",
            self.rejections.validation_failures as f64,
        );

        if let Some(latency) = &self.acks.latency {
            gauge("ack_latency_p50_ms", "ACK latency median", latency.p50_ms);
            gauge("ack_latency_p95_ms", "ACK latency 95th percentile", latency.p95_ms);
            gauge("ack_latency_p99_ms", "ACK latency 99th percentile", latency.p99_ms);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = EngineMetrics::new();
        metrics.rooms_created.fetch_add(3, Ordering::Relaxed);
        metrics.events_applied.fetch_add(41, Ordering::Relaxed);
        metrics.rate_limit_hits.fetch_add(2, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rooms.created, 3);
        assert_eq!(snapshot.intents.events_applied, 41);
        assert_eq!(snapshot.rejections.rate_limit_hits, 2);
    }

    #[test]
    fn test_ack_rate_with_no_traffic_is_one() {
        let metrics = EngineMetrics::new();
        assert!((metrics.snapshot().acks.rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ack_rate_reflects_losses() {
        let metrics = EngineMetrics::new();
        metrics.acks_expected.fetch_add(10, Ordering::Relaxed);
        metrics.acks_received.fetch_add(7, Ordering::Relaxed);
        let rate = metrics.snapshot().acks.rate;
        assert!((rate - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_latency_recording_and_percentiles() {
        let metrics = EngineMetrics::new();
        for micros in [1_000, 2_000, 3_000, 50_000] {
            metrics.record_ack_latency_micros(micros);
        }
        let latency = metrics.snapshot().acks.latency.expect("histogram present");
        assert_eq!(latency.samples, 4);
        assert!(latency.p50_ms >= 1.0);
        assert!(latency.max_ms >= 49.0);
    }

    #[test]
    fn test_oversized_latency_sample_is_clamped() {
        let metrics = EngineMetrics::new();
        metrics.record_ack_latency_micros(u64::MAX);
        assert_eq!(
            metrics
                .ack_latency_clamped_samples
                .load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_prometheus_render_contains_metric_lines() {
        let metrics = EngineMetrics::new();
        metrics.full_broadcasts.fetch_add(5, Ordering::Relaxed);
        let text = metrics.snapshot().to_prometheus();
        assert!(text.contains("parlor_full_broadcasts_total 5"));
        assert!(text.contains("# TYPE parlor_ack_rate gauge"));
    }
}
