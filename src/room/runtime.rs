//! The single-writer room loop.
//!
//! Every mutation of a room's state flows through one task: client
//! intents, host commands, timer callbacks, and periodic ticks are
//! processed to completion in arrival order, so room state needs no
//! further synchronization. Plugin code only ever runs inside this
//! loop; timers re-enter it as synthetic intents.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::handle::{JoinRequest, RoomCommand, RoomHandle};
use super::state::RoomState;
use crate::broadcast::Fanout;
use crate::config::Config;
use crate::dedup::DedupStore;
use crate::fsm::{FsmState, GameFsm};
use crate::game::{GameBox, GamePlugin, PluginContext, TimerRequest};
use crate::metrics::EngineMetrics;
use crate::protocol::{
    ConnectionRole, ErrorCode, Event, EventId, GameKind, GameLifecycle, HandshakePayload, Intent,
    IntentResult, IntentStatus, IntentSubmission, Player, PlayerId, PlayerStatus,
    ReplayResponsePayload, SoundHint, Version,
};
use crate::reconnect::ReconnectRegistry;
use crate::replay::ReplayBuffer;
use crate::security_log::{AuditKind, SecurityLog, Severity};
use crate::snapshot::{SnapshotCause, SnapshotStore};
use crate::storage::RoomStore;
use crate::sync::SyncEngine;

/// Shared singletons injected into every room, with explicit init and
/// teardown at the dispatcher.
#[derive(Clone)]
pub struct RuntimeServices {
    pub config: Arc<Config>,
    pub fanout: Arc<dyn Fanout>,
    pub dedup: DedupStore,
    pub reconnect: Arc<ReconnectRegistry>,
    pub security: Arc<SecurityLog>,
    pub metrics: Arc<EngineMetrics>,
    pub store: Arc<dyn RoomStore>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct TimerEntry {
    action: String,
    data: serde_json::Value,
    deadline: Instant,
    handle: tokio::task::JoinHandle<()>,
}

/// A timer frozen by pause, holding its remaining duration.
struct FrozenTimer {
    name: String,
    action: String,
    data: serde_json::Value,
    remaining: Duration,
}

pub struct RoomRuntime {
    state: RoomState,
    fsm: GameFsm,
    plugin: Option<GameBox>,
    sync: SyncEngine,
    replay: ReplayBuffer,
    snapshots: SnapshotStore,
    services: RuntimeServices,
    timers: HashMap<String, TimerEntry>,
    frozen_timers: Vec<FrozenTimer>,
    /// Lifecycle to restore when the host resumes from pause
    resume_lifecycle: Option<GameLifecycle>,
    self_tx: mpsc::UnboundedSender<RoomCommand>,
    tick_counter: u64,
}

impl RoomRuntime {
    /// Start the room's loop and return its handle.
    pub fn spawn(state: RoomState, shard: u32, services: RuntimeServices) -> RoomHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RoomHandle::new(state.code.clone(), shard, tx.clone());

        let sync = SyncEngine::new(
            services.config.sync.clone(),
            services.fanout.clone(),
            services.metrics.clone(),
        );
        let replay = ReplayBuffer::new(
            services.config.sync.replay_buffer_capacity,
            services.config.sync.replay_event_ttl(),
        );
        let snapshots = SnapshotStore::new(
            state.code.clone(),
            services.config.sync.snapshot_max_per_room,
            services.config.sync.compress_snapshots,
        );

        let runtime = Self {
            state,
            fsm: GameFsm::new(),
            plugin: None,
            sync,
            replay,
            snapshots,
            services,
            timers: HashMap::new(),
            frozen_timers: Vec::new(),
            resume_lifecycle: None,
            self_tx: tx,
            tick_counter: 0,
        };
        tokio::spawn(runtime.run(rx));
        handle
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RoomCommand>) {
        let mut scanner = tokio::time::interval(self.services.config.sync.scan_interval());
        scanner.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await == Flow::Stop {
                            break;
                        }
                    }
                    None => break,
                },
                _ = scanner.tick() => {
                    if self.on_scan_tick() == Flow::Stop {
                        break;
                    }
                    // Persist alongside the slow housekeeping cadence
                    if self.tick_counter % 50 == 0 {
                        self.persist().await;
                    }
                }
            }
        }

        self.teardown().await;
    }

    async fn handle_command(&mut self, command: RoomCommand) -> Flow {
        match command {
            RoomCommand::Join { request, reply } => {
                let outcome = self.handle_join(request).await;
                let _ = reply.send(outcome);
                Flow::Continue
            }
            RoomCommand::SubmitIntent {
                player_id,
                role,
                submission,
            } => {
                self.process_intent(player_id, role, submission);
                Flow::Continue
            }
            RoomCommand::Ack {
                player_id,
                version,
                message_type: _,
                client_timestamp,
            } => {
                self.sync.handle_ack(player_id, version, client_timestamp);
                if let Some(player) = self.state.players.get_mut(&player_id) {
                    player.touch();
                }
                Flow::Continue
            }
            RoomCommand::ReplayRequest {
                player_id,
                from_version,
                from_timestamp,
            } => {
                self.handle_replay_request(player_id, from_version, from_timestamp);
                Flow::Continue
            }
            RoomCommand::ConnectionClosed { player_id } => {
                self.handle_connection_closed(player_id);
                Flow::Continue
            }
            RoomCommand::TimerFired { name, action, data } => {
                self.timers.remove(&name);
                // Timer callbacks run as host-attributed intents through
                // the normal pipeline
                let submission = IntentSubmission {
                    id: Uuid::new_v4(),
                    action,
                    data,
                    version: None,
                    idempotency_key: None,
                };
                self.process_intent(self.state.host_id, ConnectionRole::HostControl, submission);
                Flow::Continue
            }
            RoomCommand::Summary { reply } => {
                let _ = reply.send(self.state.summary());
                Flow::Continue
            }
            RoomCommand::Destroy { reason } => {
                self.notify_room_closed(&reason);
                Flow::Stop
            }
        }
    }

    // ---- joining, leaving, reconnection ----

    async fn handle_join(
        &mut self,
        request: JoinRequest,
    ) -> Result<Box<HandshakePayload>, (ErrorCode, String)> {
        if self.state.is_expired(Utc::now()) {
            return Err((ErrorCode::Expired, "room has expired".to_string()));
        }

        match request.role {
            ConnectionRole::HostDisplay => {
                self.state.observers.insert(request.connection_id);
                Ok(Box::new(self.handshake_payload(request.connection_id, false, None)))
            }
            ConnectionRole::HostControl => {
                // The creating connection's id IS the host id; that
                // first handshake needs no token. Afterwards only a
                // valid host token resumes control.
                if request.connection_id == self.state.host_id {
                    let token = self.issue_token(request.connection_id).await;
                    return Ok(Box::new(self.handshake_payload(
                        request.connection_id,
                        false,
                        token,
                    )));
                }
                let resumed = request
                    .reconnect_token
                    .as_deref()
                    .and_then(|token| self.services.reconnect.resolve(&self.state.code, token));
                match resumed {
                    Some(old_id) if old_id == self.state.host_id => {
                        self.complete_reconnect(old_id, request.connection_id);
                        let token = self.issue_token(request.connection_id).await;
                        Ok(Box::new(self.handshake_payload(
                            request.connection_id,
                            true,
                            token,
                        )))
                    }
                    _ => Err((
                        ErrorCode::Unauthorized,
                        "host control requires a valid host token".to_string(),
                    )),
                }
            }
            ConnectionRole::Player => self.handle_player_join(request).await,
        }
    }

    async fn handle_player_join(
        &mut self,
        request: JoinRequest,
    ) -> Result<Box<HandshakePayload>, (ErrorCode, String)> {
        // Reconnect path: token resolves to an existing player record
        if let Some(token) = request.reconnect_token.as_deref() {
            if let Some(old_id) = self.services.reconnect.resolve(&self.state.code, token) {
                if self.state.is_member(old_id) {
                    self.complete_reconnect(old_id, request.connection_id);
                    let token = self.issue_token(request.connection_id).await;
                    return Ok(Box::new(self.handshake_payload(
                        request.connection_id,
                        true,
                        token,
                    )));
                }
            }
            // Expired or alien token falls through to a fresh join
        }

        let name = request
            .player_name
            .clone()
            .ok_or_else(|| (ErrorCode::ValidationFailed, "player name required".to_string()))?;

        if self.state.players.len() >= self.state.settings.max_players {
            return Err((ErrorCode::ValidationFailed, "room is full".to_string()));
        }

        let player_id = request.connection_id;
        self.state
            .players
            .insert(player_id, Player::new(player_id, name.clone()));

        self.record_event(
            "player_joined",
            json!({"player": player_id, "name": name}),
            None,
            None,
            false,
            None,
        );
        self.broadcast_roster();
        self.persist().await;

        let token = self.issue_token(player_id).await;
        Ok(Box::new(self.handshake_payload(player_id, false, token)))
    }

    /// Migrate a player record from its old id to the id of the new
    /// connection, atomically from the room's perspective.
    fn complete_reconnect(&mut self, old_id: PlayerId, new_id: PlayerId) {
        if old_id != new_id {
            if let Some(mut player) = self.state.players.remove(&old_id) {
                player.id = new_id;
                player.status = PlayerStatus::Connected;
                player.touch();
                self.state.players.insert(new_id, player);
            }
            if self.state.host_id == old_id {
                self.state.host_id = new_id;
            }
            if let Some(plugin) = self.plugin.as_mut() {
                plugin.migrate_player(old_id, new_id);
            }
            self.sync.forget_player(old_id);
        } else if let Some(player) = self.state.players.get_mut(&old_id) {
            player.status = PlayerStatus::Connected;
            player.touch();
        }

        self.record_event(
            "player_reconnected",
            json!({"old": old_id, "new": new_id}),
            None,
            None,
            false,
            None,
        );
        // The handshake reply path sends the returning client its
        // personalized full state
        self.broadcast_roster();
    }

    async fn issue_token(&self, player_id: PlayerId) -> Option<String> {
        let (token, persisted) = self.services.reconnect.issue(&self.state.code, player_id);
        if let Err(error) = self.services.store.save_player_token(&persisted).await {
            tracing::warn!(room = %self.state.code, %error, "failed to persist reconnect token");
        }
        Some(token)
    }

    fn handshake_payload(
        &mut self,
        player_id: PlayerId,
        resumed: bool,
        reconnect_token: Option<String>,
    ) -> HandshakePayload {
        // New connections get their own full view immediately
        let state_view = self.compose_state(Some(player_id));
        let code = self.state.code.clone();
        self.sync
            .sync_to_player(&code, player_id, self.state.version, state_view);

        HandshakePayload {
            player_id,
            room_code: self.state.code.clone(),
            resumed,
            roster: self.state.roster(),
            lifecycle: self.state.lifecycle,
            current_game: self.state.current_game,
            version: self.state.version,
            settings: self.state.settings.clone(),
            reconnect_token,
        }
    }

    fn handle_connection_closed(&mut self, player_id: PlayerId) {
        if self.state.observers.remove(&player_id) {
            return;
        }
        let Some(player) = self.state.players.get_mut(&player_id) else {
            return;
        };
        player.status = PlayerStatus::Disconnected;
        player.touch();
        self.sync.forget_player(player_id);

        if player_id == self.state.host_id {
            self.handle_host_disconnect();
        }
        self.broadcast_roster();
    }

    /// Host drop: hand off to the longest-connected player when policy
    /// allows, otherwise pause the active game in place.
    fn handle_host_disconnect(&mut self) {
        let successor = self
            .state
            .settings
            .allow_host_handoff
            .then(|| {
                self.state
                    .players
                    .values()
                    .filter(|player| {
                        player.status == PlayerStatus::Connected
                            && player.id != self.state.host_id
                    })
                    .min_by_key(|player| player.joined_at)
                    .map(|player| player.id)
            })
            .flatten();

        match successor {
            Some(new_host) => {
                let old_host = self.state.host_id;
                self.state.host_id = new_host;
                self.record_event(
                    "host_changed",
                    json!({"old": old_host, "new": new_host}),
                    None,
                    None,
                    false,
                    None,
                );
                self.services.security.record(
                    AuditKind::RoomLifecycle,
                    Severity::Medium,
                    Some(self.state.code.clone()),
                    Some(new_host),
                    "host_handoff",
                    json!({"old": old_host}),
                );
            }
            None => {
                // No one to promote: pause an active game until the
                // host returns
                if matches!(
                    self.state.lifecycle,
                    GameLifecycle::Starting | GameLifecycle::Playing | GameLifecycle::RoundEnd
                ) {
                    self.enter_pause("host disconnected");
                }
            }
        }
    }

    // ---- intent pipeline ----

    fn process_intent(
        &mut self,
        player_id: PlayerId,
        role: ConnectionRole,
        submission: IntentSubmission,
    ) {
        self.services
            .metrics
            .intents_received
            .fetch_add(1, Ordering::Relaxed);
        let code = self.state.code.clone();

        if role == ConnectionRole::HostDisplay {
            self.services.metrics.unauthorized_rejections.fetch_add(1, Ordering::Relaxed);
            self.sync.send_error(
                &code,
                player_id,
                ErrorCode::Unauthorized,
                "display connections cannot submit intents",
            );
            return;
        }

        if self.state.is_expired(Utc::now()) {
            self.finish_intent(
                player_id,
                IntentResult::rejected(submission.id, ErrorCode::Expired, "room has expired"),
                submission.idempotency_key.as_deref(),
            );
            return;
        }

        // Membership is settled before anything else can answer, so a
        // non-member probing with a known intent id or idempotency key
        // learns nothing beyond NOT_FOUND
        if !self.state.is_member(player_id) {
            self.finish_intent(
                player_id,
                IntentResult::rejected(submission.id, ErrorCode::NotFound, "not in this room"),
                submission.idempotency_key.as_deref(),
            );
            return;
        }

        // At-most-once: a known intent id or idempotency key replays
        // the original result without re-executing
        if let Some(prior) = self.services.dedup.lookup(&code, submission.id) {
            self.services
                .metrics
                .intents_duplicate
                .fetch_add(1, Ordering::Relaxed);
            self.sync.send_intent_result(&code, player_id, prior);
            return;
        }
        if let Some(key) = submission.idempotency_key.as_deref() {
            if let Some(prior) = self.services.dedup.lookup_idempotency_key(&code, key) {
                self.services
                    .metrics
                    .intents_duplicate
                    .fetch_add(1, Ordering::Relaxed);
                let replay = IntentResult {
                    intent_id: submission.id,
                    ..prior
                };
                self.finish_intent(player_id, replay, None);
                return;
            }
        }

        // Stale-version submissions prompt a resync instead of running
        if let Some(seen) = submission.version {
            if seen != self.state.version {
                self.finish_intent(
                    player_id,
                    IntentResult::rejected(
                        submission.id,
                        ErrorCode::Conflict,
                        format!("room is at version {}", self.state.version),
                    ),
                    submission.idempotency_key.as_deref(),
                );
                return;
            }
        }

        let intent = Intent {
            id: submission.id,
            player_id,
            room_code: code,
            action: submission.action,
            data: submission.data,
            timestamp: Utc::now(),
            version: submission.version,
            idempotency_key: submission.idempotency_key,
            status: IntentStatus::Pending,
        };

        let result = if is_builtin_action(&intent.action) {
            self.process_builtin(&intent)
        } else {
            self.process_plugin_intent(&intent)
        };

        if !result.success {
            self.services
                .metrics
                .intents_rejected
                .fetch_add(1, Ordering::Relaxed);
        }
        let key = intent.idempotency_key.clone();
        self.finish_intent(player_id, result, key.as_deref());
    }

    /// Every schema-valid intent produces exactly one result to its
    /// submitter. Only effectful results are recorded for duplicate
    /// detection: a rejected intent may be retried under the same id
    /// once the client has resynced.
    fn finish_intent(
        &mut self,
        player_id: PlayerId,
        result: IntentResult,
        idempotency_key: Option<&str>,
    ) {
        let code = self.state.code.clone();
        if result.success {
            self.services
                .dedup
                .mark_processed(&code, result.intent_id, idempotency_key, &result);
        }
        self.sync.send_intent_result(&code, player_id, result);
    }

    fn process_plugin_intent(&mut self, intent: &Intent) -> IntentResult {
        let Some(plugin) = self.plugin.as_ref() else {
            return IntentResult::rejected(
                intent.id,
                ErrorCode::ValidationFailed,
                "no active game",
            );
        };
        if self.state.lifecycle == GameLifecycle::Paused {
            return IntentResult::rejected(intent.id, ErrorCode::ValidationFailed, "game is paused");
        }

        let ctx = PluginContext {
            room_code: &self.state.code,
            players: &self.state.players,
            host_id: self.state.host_id,
            game: plugin.kind(),
            fsm_state: self.fsm.current(),
            round: self.state.round,
            max_rounds: self.state.settings.max_rounds,
        };

        if let Err(reason) = plugin.validate(intent, &ctx) {
            self.services.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            self.services.security.record(
                AuditKind::ValidationFailure,
                Severity::Low,
                Some(self.state.code.clone()),
                Some(intent.player_id),
                intent.action.clone(),
                json!({"reason": reason}),
            );
            return IntentResult::rejected(intent.id, ErrorCode::ValidationFailed, reason);
        }

        let effects = match plugin.on_intent(intent, &ctx) {
            Ok(effects) => effects,
            Err(reason) => {
                return IntentResult::rejected(intent.id, ErrorCode::ValidationFailed, reason);
            }
        };

        for name in &effects.cancel_timers {
            self.cancel_timer(name);
        }
        for timer in &effects.timers {
            self.schedule_timer(timer.clone());
        }

        match effects.event {
            Some(proposal) => {
                let (event_id, version) = self.record_event(
                    &proposal.kind,
                    proposal.data,
                    Some(intent.id),
                    Some(proposal.id),
                    false,
                    None,
                );
                IntentResult::ok(intent.id, event_id, version)
            }
            None => IntentResult {
                success: true,
                intent_id: intent.id,
                event_id: None,
                version: None,
                error: None,
                message: None,
            },
        }
    }

    // ---- built-in (runtime-level) intents ----

    fn process_builtin(&mut self, intent: &Intent) -> IntentResult {
        let is_host = intent.player_id == self.state.host_id;
        if intent.action != "leave" && !is_host {
            self.services.metrics.unauthorized_rejections.fetch_add(1, Ordering::Relaxed);
            self.services.security.record(
                AuditKind::UnauthorizedAccess,
                Severity::Medium,
                Some(self.state.code.clone()),
                Some(intent.player_id),
                intent.action.clone(),
                json!({}),
            );
            return IntentResult::rejected(
                intent.id,
                ErrorCode::Unauthorized,
                "host-scoped action",
            );
        }

        let result = match intent.action.as_str() {
            "start_game" => self.builtin_start_game(intent),
            "start_round" => self.builtin_start_round(intent),
            "end_round" => self.builtin_transition(
                intent,
                FsmState::RoundEnd,
                GameLifecycle::RoundEnd,
                "round_ended",
                true,
                Some(SoundHint::RoundEnd),
            ),
            "show_scoreboard" => self.builtin_transition(
                intent,
                FsmState::Scoreboard,
                GameLifecycle::RoundEnd,
                "scoreboard_shown",
                false,
                None,
            ),
            "next_round" => self.builtin_transition(
                intent,
                FsmState::NextRound,
                GameLifecycle::Starting,
                "next_round_ready",
                false,
                None,
            ),
            "end_game" => self.builtin_end_game(intent),
            "return_to_lobby" => self.builtin_return_to_lobby(intent),
            "pause" => self.builtin_pause(intent),
            "resume" => self.builtin_resume(intent),
            "kick" => self.builtin_kick(intent),
            "update_settings" => self.builtin_update_settings(intent),
            "leave" => self.builtin_leave(intent),
            _ => IntentResult::rejected(intent.id, ErrorCode::ValidationFailed, "unknown action"),
        };

        if is_host && result.success && is_critical_host_action(&intent.action) {
            self.services.security.record(
                AuditKind::HostAction,
                Severity::Medium,
                Some(self.state.code.clone()),
                Some(intent.player_id),
                intent.action.clone(),
                intent.data.clone(),
            );
        }
        result
    }

    fn builtin_start_game(&mut self, intent: &Intent) -> IntentResult {
        let Ok(kind) = serde_json::from_value::<GameKind>(intent.data["game"].clone()) else {
            return IntentResult::rejected(
                intent.id,
                ErrorCode::ValidationFailed,
                "unknown game kind",
            );
        };
        if !self.fsm.transition(FsmState::Setup, Some(format!("start {kind:?}"))) {
            return self.invalid_transition(intent, FsmState::Setup);
        }

        let mut plugin = GameBox::new(kind);
        {
            let ctx = PluginContext {
                room_code: &self.state.code,
                players: &self.state.players,
                host_id: self.state.host_id,
                game: kind,
                fsm_state: self.fsm.current(),
                round: 0,
                max_rounds: self.state.settings.max_rounds,
            };
            plugin.init(&ctx);
        }
        self.plugin = Some(plugin);
        self.state.current_game = Some(kind);
        self.state.lifecycle = GameLifecycle::Starting;
        self.state.round = 0;
        self.broadcast_transition(FsmState::Lobby, FsmState::Setup, None);

        let (event_id, version) = self.record_event(
            "game_started",
            json!({"game": kind}),
            Some(intent.id),
            None,
            true,
            None,
        );
        IntentResult::ok(intent.id, event_id, version)
    }

    fn builtin_start_round(&mut self, intent: &Intent) -> IntentResult {
        let from = self.fsm.current();
        if !self.fsm.transition(FsmState::RoundStart, None) {
            return self.invalid_transition(intent, FsmState::RoundStart);
        }
        self.state.round += 1;
        self.state.lifecycle = GameLifecycle::Playing;
        self.broadcast_transition(from, FsmState::RoundStart, None);

        let (event_id, version) = self.record_event(
            "round_started",
            json!({"round": self.state.round}),
            Some(intent.id),
            None,
            true,
            Some(SoundHint::GameStart),
        );
        IntentResult::ok(intent.id, event_id, version)
    }

    fn builtin_transition(
        &mut self,
        intent: &Intent,
        to: FsmState,
        lifecycle: GameLifecycle,
        event_kind: &str,
        critical: bool,
        hint: Option<SoundHint>,
    ) -> IntentResult {
        let from = self.fsm.current();
        if !self.fsm.transition(to, None) {
            return self.invalid_transition(intent, to);
        }
        self.state.lifecycle = lifecycle;
        self.broadcast_transition(from, to, None);

        let (event_id, version) = self.record_event(
            event_kind,
            json!({"round": self.state.round}),
            Some(intent.id),
            None,
            critical,
            hint,
        );
        IntentResult::ok(intent.id, event_id, version)
    }

    fn builtin_end_game(&mut self, intent: &Intent) -> IntentResult {
        let from = self.fsm.current();
        if !self.fsm.transition(FsmState::GameEnd, None) {
            return self.invalid_transition(intent, FsmState::GameEnd);
        }
        self.state.lifecycle = GameLifecycle::GameEnd;
        self.cancel_all_timers();
        self.broadcast_transition(from, FsmState::GameEnd, None);

        let scores: serde_json::Map<String, serde_json::Value> = self
            .state
            .players
            .values()
            .map(|player| (player.id.to_string(), json!(player.score)))
            .collect();
        let (event_id, version) = self.record_event(
            "game_ended",
            json!({"final_scores": scores}),
            Some(intent.id),
            None,
            true,
            Some(SoundHint::GameEnd),
        );
        IntentResult::ok(intent.id, event_id, version)
    }

    fn builtin_return_to_lobby(&mut self, intent: &Intent) -> IntentResult {
        let from = self.fsm.current();
        if !self.fsm.transition(FsmState::Lobby, None) {
            return self.invalid_transition(intent, FsmState::Lobby);
        }
        if let Some(plugin) = self.plugin.as_mut() {
            plugin.cleanup();
        }
        self.plugin = None;
        self.state.current_game = None;
        self.state.lifecycle = GameLifecycle::Lobby;
        self.state.round = 0;
        self.broadcast_transition(from, FsmState::Lobby, None);

        let (event_id, version) =
            self.record_event("returned_to_lobby", json!({}), Some(intent.id), None, false, None);
        IntentResult::ok(intent.id, event_id, version)
    }

    fn builtin_pause(&mut self, intent: &Intent) -> IntentResult {
        if self.state.lifecycle == GameLifecycle::Paused || self.plugin.is_none() {
            return IntentResult::rejected(
                intent.id,
                ErrorCode::ValidationFailed,
                "nothing to pause",
            );
        }
        self.enter_pause("host paused");
        let (event_id, version) =
            self.record_event("game_paused", json!({}), Some(intent.id), None, true, None);
        IntentResult::ok(intent.id, event_id, version)
    }

    fn builtin_resume(&mut self, intent: &Intent) -> IntentResult {
        if self.state.lifecycle != GameLifecycle::Paused {
            return IntentResult::rejected(
                intent.id,
                ErrorCode::ValidationFailed,
                "game is not paused",
            );
        }
        self.state.lifecycle = self.resume_lifecycle.take().unwrap_or(GameLifecycle::Playing);
        // Re-arm timers with the durations they had left at pause
        let frozen = std::mem::take(&mut self.frozen_timers);
        for timer in frozen {
            self.schedule_timer(TimerRequest {
                name: timer.name,
                after: timer.remaining,
                action: timer.action,
                data: timer.data,
            });
        }
        let (event_id, version) =
            self.record_event("game_resumed", json!({}), Some(intent.id), None, true, None);
        IntentResult::ok(intent.id, event_id, version)
    }

    fn enter_pause(&mut self, reason: &str) {
        self.resume_lifecycle = Some(self.state.lifecycle);
        self.state.lifecycle = GameLifecycle::Paused;
        // Freeze timers: capture remaining time, stop the tasks
        let now = Instant::now();
        for (name, entry) in self.timers.drain() {
            entry.handle.abort();
            self.frozen_timers.push(FrozenTimer {
                name,
                action: entry.action,
                data: entry.data,
                remaining: entry.deadline.saturating_duration_since(now),
            });
        }
        tracing::info!(room = %self.state.code, reason, "game paused");
    }

    fn builtin_kick(&mut self, intent: &Intent) -> IntentResult {
        let Some(target) = intent.data["player_id"]
            .as_str()
            .and_then(|raw| raw.parse::<PlayerId>().ok())
        else {
            return IntentResult::rejected(
                intent.id,
                ErrorCode::ValidationFailed,
                "kick requires a player_id",
            );
        };
        if target == self.state.host_id {
            return IntentResult::rejected(
                intent.id,
                ErrorCode::ValidationFailed,
                "the host cannot kick themselves",
            );
        }
        if self.state.players.remove(&target).is_none() {
            return IntentResult::rejected(intent.id, ErrorCode::NotFound, "no such player");
        }
        self.sync.forget_player(target);

        let code = self.state.code.clone();
        self.sync
            .send_error(&code, target, ErrorCode::Unauthorized, "removed by the host");

        let (event_id, version) = self.record_event(
            "player_kicked",
            json!({"player": target}),
            Some(intent.id),
            None,
            false,
            None,
        );
        self.broadcast_roster();
        IntentResult::ok(intent.id, event_id, version)
    }

    fn builtin_update_settings(&mut self, intent: &Intent) -> IntentResult {
        let mut settings = self.state.settings.clone();

        if let Some(max_players) = intent.data["max_players"].as_u64() {
            let max_players = max_players as usize;
            if !(5..=100).contains(&max_players) || max_players < self.state.players.len() {
                return IntentResult::rejected(
                    intent.id,
                    ErrorCode::ValidationFailed,
                    "max_players out of range",
                );
            }
            settings.max_players = max_players;
        }
        if let Some(allow) = intent.data["allow_host_handoff"].as_bool() {
            settings.allow_host_handoff = allow;
        }
        if let Some(max_rounds) = intent.data["max_rounds"].as_u64() {
            if !(1..=50).contains(&max_rounds) {
                return IntentResult::rejected(
                    intent.id,
                    ErrorCode::ValidationFailed,
                    "max_rounds out of range",
                );
            }
            settings.max_rounds = max_rounds as u32;
        }

        self.state.settings = settings.clone();
        let (event_id, version) = self.record_event(
            "settings_updated",
            intent.data.clone(),
            Some(intent.id),
            None,
            false,
            None,
        );
        let code = self.state.code.clone();
        let recipients = self.state.recipients();
        self.sync
            .broadcast_settings(&code, version, settings, &recipients);
        IntentResult::ok(intent.id, event_id, version)
    }

    fn builtin_leave(&mut self, intent: &Intent) -> IntentResult {
        let player_id = intent.player_id;
        if self.state.players.remove(&player_id).is_none() {
            return IntentResult::rejected(intent.id, ErrorCode::NotFound, "not in this room");
        }
        self.sync.forget_player(player_id);

        let (event_id, version) = self.record_event(
            "player_left",
            json!({"player": player_id}),
            Some(intent.id),
            None,
            false,
            None,
        );
        if player_id == self.state.host_id {
            self.handle_host_disconnect();
        }
        self.broadcast_roster();
        IntentResult::ok(intent.id, event_id, version)
    }

    fn invalid_transition(&mut self, intent: &Intent, to: FsmState) -> IntentResult {
        self.services.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
        self.services.security.record(
            AuditKind::ValidationFailure,
            Severity::Low,
            Some(self.state.code.clone()),
            Some(intent.player_id),
            intent.action.clone(),
            json!({"from": self.fsm.current(), "to": to}),
        );
        IntentResult::rejected(
            intent.id,
            ErrorCode::ValidationFailed,
            format!("cannot move from {:?} to {:?}", self.fsm.current(), to),
        )
    }

    // ---- event recording and broadcasting ----

    /// The single path to a version bump: construct the event, apply it
    /// to the plugin, apply score awards, append to replay, snapshot
    /// per policy, and broadcast.
    fn record_event(
        &mut self,
        kind: &str,
        data: serde_json::Value,
        intent_id: Option<crate::protocol::IntentId>,
        event_id: Option<EventId>,
        critical: bool,
        hint: Option<SoundHint>,
    ) -> (EventId, Version) {
        let version = self.state.version + 1;
        let event = Event {
            id: event_id.unwrap_or_else(Uuid::new_v4),
            kind: kind.to_string(),
            room_code: self.state.code.clone(),
            timestamp: Utc::now(),
            version,
            data,
            intent_id,
        };

        if let Some(plugin) = self.plugin.as_mut() {
            let ctx = PluginContext {
                room_code: &self.state.code,
                players: &self.state.players,
                host_id: self.state.host_id,
                game: plugin.kind(),
                fsm_state: self.fsm.current(),
                round: self.state.round,
                max_rounds: self.state.settings.max_rounds,
            };
            plugin.apply_event(&event, &ctx);
        }
        self.apply_score_awards(&event);

        let bumped = self.state.bump_version();
        debug_assert_eq!(bumped, version);
        self.services
            .metrics
            .events_applied
            .fetch_add(1, Ordering::Relaxed);

        let id = event.id;
        self.replay.append(event);

        self.maybe_snapshot(critical);
        self.broadcast_current_state(critical, hint);

        (id, version)
    }

    /// Events may carry a `score_awards` object mapping player ids to
    /// point deltas; the runtime owns the authoritative scores.
    fn apply_score_awards(&mut self, event: &Event) {
        let Some(awards) = event.data.get("score_awards").and_then(|v| v.as_object()) else {
            return;
        };
        for (raw, delta) in awards {
            let Ok(player_id) = raw.parse::<PlayerId>() else {
                continue;
            };
            if let Some(player) = self.state.players.get_mut(&player_id) {
                player.score += delta.as_i64().unwrap_or_default();
            }
        }
    }

    fn maybe_snapshot(&mut self, critical: bool) {
        let interval = self.services.config.sync.snapshot_interval_versions;
        let due = critical || self.snapshots.interval_due(self.state.version, interval);
        if !due {
            return;
        }
        let cause = if critical {
            SnapshotCause::CriticalTransition
        } else {
            SnapshotCause::Interval
        };
        let state_view = self.compose_state(None);
        match self.snapshots.capture(self.state.version, &state_view, cause) {
            Ok(()) => {
                self.services
                    .metrics
                    .snapshots_created
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.services
                    .metrics
                    .internal_errors
                    .fetch_add(1, Ordering::Relaxed);
                tracing::error!(room = %self.state.code, %error, "snapshot capture failed");
            }
        }
    }

    fn broadcast_current_state(&mut self, critical: bool, hint: Option<SoundHint>) {
        let state_view = self.compose_state(None);
        let code = self.state.code.clone();
        let recipients = self.state.recipients();
        self.sync.broadcast_state(
            &code,
            self.state.version,
            &state_view,
            &recipients,
            critical,
            hint,
        );
    }

    fn broadcast_roster(&mut self) {
        let code = self.state.code.clone();
        let roster = self.state.roster();
        let recipients = self.state.recipients();
        self.sync
            .broadcast_roster(&code, self.state.version, roster, &recipients);
    }

    fn broadcast_transition(&mut self, from: FsmState, to: FsmState, reason: Option<String>) {
        let code = self.state.code.clone();
        let recipients = self.state.recipients();
        self.sync
            .broadcast_fsm_transition(&code, from, to, reason, &recipients);
    }

    /// The shared view of room plus game state. A viewer id produces
    /// the personalized variant (the plugin may hide fields).
    fn compose_state(&self, viewer: Option<PlayerId>) -> serde_json::Value {
        let scores: serde_json::Map<String, serde_json::Value> = self
            .state
            .players
            .values()
            .map(|player| (player.id.to_string(), json!(player.score)))
            .collect();

        let game_state = self.plugin.as_ref().map(|plugin| {
            let ctx = PluginContext {
                room_code: &self.state.code,
                players: &self.state.players,
                host_id: self.state.host_id,
                game: plugin.kind(),
                fsm_state: self.fsm.current(),
                round: self.state.round,
                max_rounds: self.state.settings.max_rounds,
            };
            plugin.serialize_state(&ctx, viewer)
        });

        json!({
            "lifecycle": self.state.lifecycle,
            "fsm": self.fsm.current(),
            "round": self.state.round,
            "scores": scores,
            "game": game_state,
        })
    }

    // ---- replay and resync ----

    fn handle_replay_request(
        &mut self,
        player_id: PlayerId,
        from_version: Option<Version>,
        from_timestamp: Option<chrono::DateTime<Utc>>,
    ) {
        self.services
            .metrics
            .replay_requests
            .fetch_add(1, Ordering::Relaxed);

        let target = match (from_version, from_timestamp) {
            (Some(version), _) => version,
            (None, Some(timestamp)) => self
                .replay
                .all()
                .iter()
                .take_while(|event| event.timestamp <= timestamp)
                .last()
                .map(|event| event.version)
                .unwrap_or(0),
            (None, None) => 0,
        };

        let payload = self.build_replay(target);
        let code = self.state.code.clone();
        self.sync.send_replay(&code, player_id, payload);
    }

    /// Snapshot at or before `target`, plus the buffered events after
    /// that snapshot up to current.
    fn build_replay(&self, target: Version) -> ReplayResponsePayload {
        let ttl = chrono::Duration::milliseconds(
            self.services.config.sync.replay_event_ttl_ms as i64,
        );
        let snapshot = self.snapshots.closest_at_or_below(target).and_then(|snap| {
            // A snapshot past its TTL may still serve when it is all we
            // have; the envelope is flagged stale
            let stale = snap.timestamp < Utc::now() - ttl;
            crate::snapshot::SnapshotStore::to_envelope(snap, stale).ok()
        });

        let after = snapshot
            .as_ref()
            .map(|envelope| envelope.version)
            .unwrap_or(target);
        let events = self.replay.events_after(after);

        ReplayResponsePayload {
            snapshot,
            events,
            current_version: self.state.version,
        }
    }

    // ---- timers ----

    fn schedule_timer(&mut self, request: TimerRequest) {
        self.cancel_timer(&request.name);
        let deadline = Instant::now() + request.after;
        let tx = self.self_tx.clone();
        let name = request.name.clone();
        let action = request.action.clone();
        let data = request.data.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            let _ = tx.send(RoomCommand::TimerFired { name, action, data });
        });
        self.timers.insert(
            request.name,
            TimerEntry {
                action: request.action,
                data: request.data,
                deadline,
                handle,
            },
        );
    }

    fn cancel_timer(&mut self, name: &str) {
        if let Some(entry) = self.timers.remove(name) {
            entry.handle.abort();
        }
    }

    fn cancel_all_timers(&mut self) {
        for (_, entry) in self.timers.drain() {
            entry.handle.abort();
        }
        self.frozen_timers.clear();
    }

    // ---- periodic work ----

    fn on_scan_tick(&mut self) -> Flow {
        let now = Utc::now();
        if self.state.is_expired(now) {
            self.services
                .metrics
                .rooms_expired
                .fetch_add(1, Ordering::Relaxed);
            self.notify_room_closed("room expired");
            return Flow::Stop;
        }

        // Sync scan: broadcast only on real change
        self.broadcast_current_state(false, None);

        // ACK timeouts drive targeted resyncs
        let lagging = self.sync.expire_acks();
        for recipient in lagging {
            let repeated = recipient.missing_versions.len() > 1;
            self.services.security.record(
                AuditKind::AckTimeout,
                if repeated { Severity::High } else { Severity::Medium },
                Some(self.state.code.clone()),
                Some(recipient.player_id),
                "ack_timeout",
                json!({"versions": recipient.missing_versions}),
            );
            let target = recipient
                .missing_versions
                .first()
                .map(|version| version.saturating_sub(1))
                .unwrap_or(0);
            let payload = self.build_replay(target);
            let code = self.state.code.clone();
            self.sync.send_replay(&code, recipient.player_id, payload);
        }

        self.tick_counter += 1;
        // Housekeeping roughly every five seconds at the default rate
        if self.tick_counter % 50 == 0 {
            self.replay.evict_expired();
            if let Some(floor) = self.replay.oldest_version() {
                self.sync.prune_ack_history(floor);
            }
            self.mark_silent_players();
        }

        Flow::Continue
    }

    /// Players silent past the grace period are marked disconnected so
    /// the roster reflects reality.
    fn mark_silent_players(&mut self) {
        let grace =
            chrono::Duration::seconds(self.services.config.protocol.room.disconnect_grace_secs as i64);
        let cutoff = Utc::now() - grace;
        let mut changed = false;
        let mut host_dropped = false;
        for player in self.state.players.values_mut() {
            if player.status == PlayerStatus::Connected && player.last_seen < cutoff {
                player.status = PlayerStatus::Disconnected;
                changed = true;
                if player.id == self.state.host_id {
                    host_dropped = true;
                }
            }
        }
        if host_dropped {
            self.handle_host_disconnect();
        }
        if changed {
            self.broadcast_roster();
        }
    }

    // ---- destruction ----

    fn notify_room_closed(&mut self, reason: &str) {
        let code = self.state.code.clone();
        for player_id in self.state.recipients() {
            self.sync
                .send_error(&code, player_id, ErrorCode::Expired, reason);
        }
        self.services.security.record(
            AuditKind::RoomLifecycle,
            Severity::Medium,
            Some(code),
            None,
            "room_closed",
            json!({"reason": reason}),
        );
    }

    /// Cascade cleanup of every subsystem the room owns or is keyed
    /// into. Cancels all outstanding timers and pending ACK waits.
    async fn teardown(&mut self) {
        self.cancel_all_timers();
        if let Some(plugin) = self.plugin.as_mut() {
            plugin.cleanup();
        }
        self.plugin = None;
        self.sync.clear();
        self.replay.clear();
        self.snapshots.clear();
        self.services.dedup.clear_room(&self.state.code);
        self.services.reconnect.clear_room(&self.state.code);
        if let Err(error) = self.services.store.delete_room(&self.state.code).await {
            tracing::warn!(room = %self.state.code, %error, "failed to delete persisted room");
        }
        self.services
            .metrics
            .rooms_deleted
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(room = %self.state.code, "room torn down");
    }

    async fn persist(&self) {
        if let Err(error) = self.services.store.upsert_room(&self.state.to_persisted()).await {
            tracing::warn!(room = %self.state.code, %error, "failed to persist room");
        }
    }
}

/// Actions handled by the runtime itself rather than the plugin.
fn is_builtin_action(action: &str) -> bool {
    matches!(
        action,
        "start_game"
            | "start_round"
            | "end_round"
            | "show_scoreboard"
            | "next_round"
            | "end_game"
            | "return_to_lobby"
            | "pause"
            | "resume"
            | "kick"
            | "update_settings"
            | "leave"
    )
}

/// Host actions recorded to the security log.
fn is_critical_host_action(action: &str) -> bool {
    matches!(action, "start_game" | "end_game" | "pause" | "resume" | "kick")
}
