//! Versioned state broadcasting.
//!
//! The sync engine is the sole emitter of `state_sync` broadcasts and
//! replay responses. It is invoked right after a version bump and by
//! the periodic scanner, which hands in the plugin's current serialized
//! state; a broadcast goes out only on real change. Full versus delta
//! is decided per broadcast: unknown client baseline, critical FSM
//! transitions, and delta-run length force a full state, otherwise a
//! delta against the last broadcast is preferred. Full broadcasts keep
//! a minimum gap between them, bypassed for critical transitions.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::ack::{AckTracker, LaggingRecipient};
use crate::broadcast::{Fanout, OutboundMessage};
use crate::config::SyncConfig;
use crate::delta;
use crate::metrics::EngineMetrics;
use crate::protocol::{
    ErrorCode, IntentResult, PlayerId, ReplayResponsePayload, RoomCode, RoomSettings, Roster,
    ServerEnvelope, ServerMessage, SoundHint, StateSyncPayload, SyncMode, SyncScope, Version,
};

/// Per-room sync state. Owned by the room runtime; owns the ACK
/// tracker.
pub struct SyncEngine {
    config: SyncConfig,
    fanout: Arc<dyn Fanout>,
    metrics: Arc<EngineMetrics>,
    ack: AckTracker,
    /// Base for delta computation and change detection
    last_broadcast_state: Option<serde_json::Value>,
    last_full_at: Option<Instant>,
    deltas_since_full: u32,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, fanout: Arc<dyn Fanout>, metrics: Arc<EngineMetrics>) -> Self {
        let ack = AckTracker::new(metrics.clone());
        Self {
            config,
            fanout,
            metrics,
            ack,
            last_broadcast_state: None,
            last_full_at: None,
            deltas_since_full: 0,
        }
    }

    /// Broadcast the current state if it changed (or unconditionally on
    /// a critical transition). Returns true when something was sent.
    pub fn broadcast_state(
        &mut self,
        room_code: &RoomCode,
        version: Version,
        state: &serde_json::Value,
        recipients: &[PlayerId],
        critical: bool,
        hint: Option<SoundHint>,
    ) -> bool {
        if recipients.is_empty() {
            self.last_broadcast_state = Some(state.clone());
            return false;
        }

        let unchanged = self
            .last_broadcast_state
            .as_ref()
            .map(|last| last == state)
            .unwrap_or(false);
        if unchanged && !critical {
            return false;
        }

        let full_due = self.last_broadcast_state.is_none()
            || critical
            || self.deltas_since_full >= self.config.max_deltas_between_full;
        let gap_elapsed = self
            .last_full_at
            .map(|at| at.elapsed() >= self.config.min_full_broadcast_gap())
            .unwrap_or(true);

        // The gap only throttles non-critical fulls, and only when a
        // delta base exists to fall back on
        let send_full =
            full_due && (critical || gap_elapsed || self.last_broadcast_state.is_none());

        let payload = if send_full {
            self.deltas_since_full = 0;
            self.last_full_at = Some(Instant::now());
            self.metrics.full_broadcasts.fetch_add(1, Ordering::Relaxed);
            StateSyncPayload {
                scope: SyncScope::State,
                mode: SyncMode::Full,
                version,
                state: Some(state.clone()),
                delta: None,
                roster: None,
                settings: None,
                hint,
            }
        } else {
            let base = match self.last_broadcast_state.as_ref() {
                Some(base) => base,
                None => return false,
            };
            let change = delta::diff(base, state);
            if change.is_empty() {
                return false;
            }
            self.deltas_since_full += 1;
            self.metrics.delta_broadcasts.fetch_add(1, Ordering::Relaxed);
            StateSyncPayload {
                scope: SyncScope::State,
                mode: SyncMode::Delta,
                version,
                state: None,
                delta: Some(change),
                roster: None,
                settings: None,
                hint,
            }
        };

        self.last_broadcast_state = Some(state.clone());
        self.ack
            .register_broadcast(version, recipients.iter().copied(), "state_sync");
        self.fanout.broadcast(
            recipients,
            envelope(room_code, ServerMessage::StateSync(Box::new(payload))),
        );
        true
    }

    /// Personalized full state to one player (initial join path).
    pub fn sync_to_player(
        &mut self,
        room_code: &RoomCode,
        player_id: PlayerId,
        version: Version,
        state: serde_json::Value,
    ) {
        self.metrics.full_broadcasts.fetch_add(1, Ordering::Relaxed);
        let payload = StateSyncPayload {
            scope: SyncScope::State,
            mode: SyncMode::Full,
            version,
            state: Some(state),
            delta: None,
            roster: None,
            settings: None,
            hint: None,
        };
        self.ack
            .register_broadcast(version, [player_id], "state_sync");
        self.fanout.send_to(
            player_id,
            envelope(room_code, ServerMessage::StateSync(Box::new(payload))),
        );
    }

    /// Authoritative roster broadcast after any membership change.
    pub fn broadcast_roster(
        &mut self,
        room_code: &RoomCode,
        version: Version,
        roster: Roster,
        recipients: &[PlayerId],
    ) {
        self.metrics.roster_broadcasts.fetch_add(1, Ordering::Relaxed);
        let payload = StateSyncPayload {
            scope: SyncScope::Roster,
            mode: SyncMode::Full,
            version,
            state: None,
            delta: None,
            roster: Some(roster),
            settings: None,
            hint: None,
        };
        self.ack
            .register_broadcast(version, recipients.iter().copied(), "state_sync");
        self.fanout.broadcast(
            recipients,
            envelope(room_code, ServerMessage::StateSync(Box::new(payload))),
        );
    }

    /// Settings broadcast after a host settings change.
    pub fn broadcast_settings(
        &mut self,
        room_code: &RoomCode,
        version: Version,
        settings: RoomSettings,
        recipients: &[PlayerId],
    ) {
        let payload = StateSyncPayload {
            scope: SyncScope::Settings,
            mode: SyncMode::Full,
            version,
            state: None,
            delta: None,
            roster: None,
            settings: Some(settings),
            hint: None,
        };
        self.ack
            .register_broadcast(version, recipients.iter().copied(), "state_sync");
        self.fanout.broadcast(
            recipients,
            envelope(room_code, ServerMessage::StateSync(Box::new(payload))),
        );
    }

    /// Lifecycle transition notification.
    pub fn broadcast_fsm_transition(
        &self,
        room_code: &RoomCode,
        from: crate::fsm::FsmState,
        to: crate::fsm::FsmState,
        reason: Option<String>,
        recipients: &[PlayerId],
    ) {
        self.fanout.broadcast(
            recipients,
            envelope(room_code, ServerMessage::FsmTransition { from, to, reason }),
        );
    }

    /// Snapshot-plus-events catch-up to one lagging or late-joining
    /// client.
    pub fn send_replay(
        &mut self,
        room_code: &RoomCode,
        player_id: PlayerId,
        payload: ReplayResponsePayload,
    ) {
        self.metrics.resyncs_sent.fetch_add(1, Ordering::Relaxed);
        let current_version = payload.current_version;
        self.ack
            .register_broadcast(current_version, [player_id], "replay_response");
        self.fanout.send_to(
            player_id,
            envelope(
                room_code,
                ServerMessage::ReplayResponse(Box::new(payload)),
            ),
        );
    }

    /// Result of an intent, to the submitter only.
    pub fn send_intent_result(
        &self,
        room_code: &RoomCode,
        player_id: PlayerId,
        result: IntentResult,
    ) {
        self.fanout.send_to(
            player_id,
            envelope(room_code, ServerMessage::IntentResult(result)),
        );
    }

    /// Error reply to one player.
    pub fn send_error(
        &self,
        room_code: &RoomCode,
        player_id: PlayerId,
        code: ErrorCode,
        message: impl Into<String>,
    ) {
        self.fanout
            .send_to(player_id, envelope(room_code, ServerMessage::error(code, message)));
    }

    /// Process an inbound ACK.
    pub fn handle_ack(
        &mut self,
        player_id: PlayerId,
        version: Version,
        client_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    ) -> bool {
        self.ack.acknowledge(player_id, version, client_timestamp)
    }

    /// Scanner tick: time out stale pending ACKs. The runtime builds a
    /// replay for each lagging recipient returned.
    pub fn expire_acks(&mut self) -> Vec<LaggingRecipient> {
        self.ack.expire(self.config.ack_timeout())
    }

    /// Highest version the recipient has acknowledged.
    pub fn last_acknowledged(&self, player_id: PlayerId) -> Option<Version> {
        self.ack.last_acknowledged(player_id)
    }

    /// Stop tracking a departed player.
    pub fn forget_player(&mut self, player_id: PlayerId) {
        self.ack.forget_recipient(player_id);
    }

    /// Room-level ACK statistics: (sent, acked, missing, rate).
    pub fn ack_stats(&self) -> (u64, u64, u64, f64) {
        self.ack.stats()
    }

    /// Bound ACK bookkeeping as versions advance.
    pub fn prune_ack_history(&mut self, floor: Version) {
        self.ack.prune_below(floor);
    }

    /// Discard all sync state on room destruction; no pending ACK set
    /// survives the room.
    pub fn clear(&mut self) {
        self.ack.clear();
        self.last_broadcast_state = None;
        self.last_full_at = None;
        self.deltas_since_full = 0;
    }
}

fn envelope(room_code: &RoomCode, message: ServerMessage) -> OutboundMessage {
    OutboundMessage::new(ServerEnvelope::new(Some(room_code.clone()), message))
}
