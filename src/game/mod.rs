//! The plugin contract every game implements, and the closed set of
//! known games.
//!
//! The plugin set is fixed at build time, so games are dispatched
//! through a tagged variant rather than trait objects. A plugin's only
//! path to changing authoritative state is returning an event proposal
//! from `on_intent`; `apply_event` must be idempotent because the same
//! event may be re-applied during replay.

pub mod buzzer;
pub mod context;
pub mod trivia;

pub use context::{
    EventProposal, IntentEffects, PluginContext, RenderDescriptor, TimerRequest,
};

use crate::protocol::{Event, GameKind, Intent, PlayerId};
use buzzer::BuzzerGame;
use trivia::TriviaGame;

/// Capability set every game implements.
pub trait GamePlugin {
    /// Called once per game start, before any intent is processed.
    fn init(&mut self, ctx: &PluginContext<'_>);

    /// Structural and rules validation. An error message here reaches
    /// the submitter inside the failed intent result.
    fn validate(&self, intent: &Intent, ctx: &PluginContext<'_>) -> Result<(), String>;

    /// Execute the intent. Must be deterministic given `(intent, ctx)`
    /// and must not mutate game state; state changes happen only in
    /// [`Self::apply_event`].
    fn on_intent(
        &self,
        intent: &Intent,
        ctx: &PluginContext<'_>,
    ) -> Result<IntentEffects, String>;

    /// Apply an event to in-memory game state. Idempotent on repeat.
    fn apply_event(&mut self, event: &Event, ctx: &PluginContext<'_>);

    /// Produce the view state, personalized when a viewer is given
    /// (e.g. the correct answer is hidden from non-hosts).
    fn serialize_state(
        &self,
        ctx: &PluginContext<'_>,
        viewer: Option<PlayerId>,
    ) -> serde_json::Value;

    /// Layout hint for display clients.
    fn render_descriptor(&self) -> RenderDescriptor;

    /// Move any per-player game data from `old` to `new` after a
    /// reconnect assigned a fresh player id.
    fn migrate_player(&mut self, old: PlayerId, new: PlayerId);

    /// Release timers and references at game end or room destruction.
    fn cleanup(&mut self);
}

/// The closed set of games, dispatched statically.
#[derive(Debug)]
pub enum GameBox {
    Trivia(TriviaGame),
    Buzzer(BuzzerGame),
}

impl GameBox {
    pub fn new(kind: GameKind) -> Self {
        match kind {
            GameKind::Trivia => Self::Trivia(TriviaGame::default()),
            GameKind::Buzzer => Self::Buzzer(BuzzerGame::default()),
        }
    }

    pub fn kind(&self) -> GameKind {
        match self {
            Self::Trivia(_) => GameKind::Trivia,
            Self::Buzzer(_) => GameKind::Buzzer,
        }
    }
}

impl GamePlugin for GameBox {
    fn init(&mut self, ctx: &PluginContext<'_>) {
        match self {
            Self::Trivia(game) => game.init(ctx),
            Self::Buzzer(game) => game.init(ctx),
        }
    }

    fn validate(&self, intent: &Intent, ctx: &PluginContext<'_>) -> Result<(), String> {
        match self {
            Self::Trivia(game) => game.validate(intent, ctx),
            Self::Buzzer(game) => game.validate(intent, ctx),
        }
    }

    fn on_intent(
        &self,
        intent: &Intent,
        ctx: &PluginContext<'_>,
    ) -> Result<IntentEffects, String> {
        match self {
            Self::Trivia(game) => game.on_intent(intent, ctx),
            Self::Buzzer(game) => game.on_intent(intent, ctx),
        }
    }

    fn apply_event(&mut self, event: &Event, ctx: &PluginContext<'_>) {
        match self {
            Self::Trivia(game) => game.apply_event(event, ctx),
            Self::Buzzer(game) => game.apply_event(event, ctx),
        }
    }

    fn serialize_state(
        &self,
        ctx: &PluginContext<'_>,
        viewer: Option<PlayerId>,
    ) -> serde_json::Value {
        match self {
            Self::Trivia(game) => game.serialize_state(ctx, viewer),
            Self::Buzzer(game) => game.serialize_state(ctx, viewer),
        }
    }

    fn render_descriptor(&self) -> RenderDescriptor {
        match self {
            Self::Trivia(game) => game.render_descriptor(),
            Self::Buzzer(game) => game.render_descriptor(),
        }
    }

    fn migrate_player(&mut self, old: PlayerId, new: PlayerId) {
        match self {
            Self::Trivia(game) => game.migrate_player(old, new),
            Self::Buzzer(game) => game.migrate_player(old, new),
        }
    }

    fn cleanup(&mut self) {
        match self {
            Self::Trivia(game) => game.cleanup(),
            Self::Buzzer(game) => game.cleanup(),
        }
    }
}
