//! Critical-action audit trail.
//!
//! Every critical host action, validation failure, rate-limit trip, and
//! repeated ACK timeout is recorded here with severity, room code,
//! actor, and a structured payload. Entries land in a bounded in-memory
//! ring (inspectable over the admin surface) and are mirrored to the
//! tracing pipeline at a matching level, which handles batched file I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::protocol::{PlayerId, RoomCode};

/// How serious an audited occurrence is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// What class of occurrence is being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    HostAction,
    ValidationFailure,
    RateLimitTrip,
    AckTimeout,
    UnauthorizedAccess,
    RoomLifecycle,
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_code: Option<RoomCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<PlayerId>,
    pub action: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}

/// Append-only security log with a bounded in-memory window.
#[derive(Debug)]
pub struct SecurityLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

pub const DEFAULT_CAPACITY: usize = 4096;

impl Default for SecurityLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SecurityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Record an occurrence. Oldest entries are dropped beyond capacity.
    pub fn record(
        &self,
        kind: AuditKind,
        severity: Severity,
        room_code: Option<RoomCode>,
        actor: Option<PlayerId>,
        action: impl Into<String>,
        detail: serde_json::Value,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            kind,
            severity,
            room_code,
            actor,
            action: action.into(),
            detail,
        };

        match severity {
            Severity::Low => tracing::debug!(
                kind = ?entry.kind,
                room = entry.room_code.as_deref().unwrap_or("-"),
                action = %entry.action,
                "audit"
            ),
            Severity::Medium => tracing::info!(
                kind = ?entry.kind,
                room = entry.room_code.as_deref().unwrap_or("-"),
                action = %entry.action,
                "audit"
            ),
            Severity::High => tracing::warn!(
                kind = ?entry.kind,
                room = entry.room_code.as_deref().unwrap_or("-"),
                action = %entry.action,
                "audit"
            ),
            Severity::Critical => tracing::error!(
                kind = ?entry.kind,
                room = entry.room_code.as_deref().unwrap_or("-"),
                action = %entry.action,
                "audit"
            ),
        }

        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Most recent entries, newest last, bounded by `limit`.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => {
                let skip = entries.len().saturating_sub(limit);
                entries.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_and_read_back() {
        let log = SecurityLog::new(16);
        log.record(
            AuditKind::HostAction,
            Severity::Medium,
            Some("WXYZ".to_string()),
            None,
            "start_game",
            json!({"game": "trivia"}),
        );

        let recent = log.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action, "start_game");
        assert_eq!(recent[0].severity, Severity::Medium);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = SecurityLog::new(3);
        for i in 0..5 {
            log.record(
                AuditKind::ValidationFailure,
                Severity::Low,
                None,
                None,
                format!("entry-{i}"),
                serde_json::Value::Null,
            );
        }
        let recent = log.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].action, "entry-2");
        assert_eq!(recent[2].action, "entry-4");
    }

    #[test]
    fn test_recent_limit_returns_newest() {
        let log = SecurityLog::new(10);
        for i in 0..6 {
            log.record(
                AuditKind::RateLimitTrip,
                Severity::Medium,
                None,
                None,
                format!("trip-{i}"),
                serde_json::Value::Null,
            );
        }
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].action, "trip-5");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
