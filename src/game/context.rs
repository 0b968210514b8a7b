//! Types crossing the plugin boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::fsm::FsmState;
use crate::protocol::{EventId, GameKind, Player, PlayerId, RoomCode};

/// Read-only view of the room handed to `validate` and `on_intent`.
///
/// Plugins never mutate the room through this; returning an event
/// proposal is the only path to a version bump.
#[derive(Debug)]
pub struct PluginContext<'a> {
    pub room_code: &'a RoomCode,
    pub players: &'a HashMap<PlayerId, Player>,
    pub host_id: PlayerId,
    pub game: GameKind,
    pub fsm_state: FsmState,
    pub round: u32,
    pub max_rounds: u32,
}

impl PluginContext<'_> {
    /// Whether the submitting player may act at all (spectators and
    /// disconnected players cannot submit gameplay intents).
    pub fn can_play(&self, player_id: PlayerId) -> bool {
        self.players
            .get(&player_id)
            .map(|player| player.status == crate::protocol::PlayerStatus::Connected)
            .unwrap_or(false)
    }
}

/// A state change the plugin wants recorded. The pipeline wraps this in
/// an [`crate::protocol::Event`] with the next room version.
#[derive(Debug, Clone)]
pub struct EventProposal {
    pub id: EventId,
    pub kind: String,
    pub data: serde_json::Value,
}

impl EventProposal {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            kind: kind.into(),
            data,
        }
    }
}

/// A timer the plugin asks the runtime to schedule. Firing re-enters
/// the room queue as a synthetic intent, so plugin code never runs
/// outside the single-writer loop.
#[derive(Debug, Clone)]
pub struct TimerRequest {
    /// Stable name; scheduling again under the same name replaces the
    /// previous timer
    pub name: String,
    pub after: Duration,
    /// Action of the synthetic intent delivered on expiry
    pub action: String,
    pub data: serde_json::Value,
}

/// Everything a successful `on_intent` can produce.
#[derive(Debug, Clone, Default)]
pub struct IntentEffects {
    /// The event to record, if the intent changes state
    pub event: Option<EventProposal>,
    /// Timers to (re)schedule
    pub timers: Vec<TimerRequest>,
    /// Timer names to cancel
    pub cancel_timers: Vec<String>,
}

impl IntentEffects {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn event(proposal: EventProposal) -> Self {
        Self {
            event: Some(proposal),
            ..Self::default()
        }
    }

    pub fn with_timer(mut self, timer: TimerRequest) -> Self {
        self.timers.push(timer);
        self
    }
}

/// Opaque-to-core layout hint consumed by display clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderDescriptor {
    /// Layout family the display should use, e.g. "question-grid"
    pub layout: String,
    /// Free-form per-game hints
    #[serde(default)]
    pub hints: serde_json::Value,
}
