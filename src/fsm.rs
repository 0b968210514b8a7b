//! Validated lifecycle state machine shared by all games.
//!
//! The transition table is closed: any edge not listed is rejected as a
//! no-op. Every accepted transition is recorded in an append-only
//! history that the security log and tests can audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{GameLifecycle, SoundHint};

/// Fine-grained game lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsmState {
    Lobby,
    Setup,
    RoundStart,
    RoundEnd,
    Scoreboard,
    NextRound,
    GameEnd,
}

impl FsmState {
    /// Valid successor states for this state.
    pub fn successors(&self) -> &'static [FsmState] {
        match self {
            Self::Lobby => &[Self::Setup],
            Self::Setup => &[Self::RoundStart, Self::Lobby],
            Self::RoundStart => &[Self::RoundEnd, Self::GameEnd],
            Self::RoundEnd => &[Self::Scoreboard, Self::GameEnd],
            Self::Scoreboard => &[Self::NextRound, Self::GameEnd],
            Self::NextRound => &[Self::RoundStart, Self::GameEnd],
            Self::GameEnd => &[Self::Lobby],
        }
    }

    /// Whether `to` is a legal transition target from this state.
    pub fn can_transition_to(&self, to: FsmState) -> bool {
        self.successors().contains(&to)
    }

    /// States whose entry warrants an immediate snapshot and an
    /// immediate (gap-bypassing) full broadcast.
    pub fn is_critical_entry(&self) -> bool {
        matches!(self, Self::RoundStart | Self::RoundEnd | Self::GameEnd)
    }

    /// Sound cue displays should play when this state is entered.
    pub fn sound_hint(&self) -> Option<SoundHint> {
        match self {
            Self::RoundStart => Some(SoundHint::GameStart),
            Self::RoundEnd => Some(SoundHint::RoundEnd),
            Self::GameEnd => Some(SoundHint::GameEnd),
            _ => None,
        }
    }
}

/// One accepted transition, as recorded in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: FsmState,
    pub to: FsmState,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The per-room lifecycle machine.
#[derive(Debug, Clone)]
pub struct GameFsm {
    current: FsmState,
    history: Vec<TransitionRecord>,
}

impl Default for GameFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl GameFsm {
    pub fn new() -> Self {
        Self {
            current: FsmState::Lobby,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> FsmState {
        self.current
    }

    /// Append-only record of accepted transitions, oldest first.
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Attempt a transition. Invalid edges are a no-op returning false;
    /// a valid edge updates the current state and pushes history.
    pub fn transition(&mut self, to: FsmState, reason: Option<String>) -> bool {
        if !self.current.can_transition_to(to) {
            tracing::debug!(from = ?self.current, ?to, "rejected fsm transition");
            return false;
        }

        self.history.push(TransitionRecord {
            from: self.current,
            to,
            timestamp: Utc::now(),
            reason,
        });
        self.current = to;
        true
    }

    /// Force the machine back to the lobby, bypassing the table. Used
    /// only when a room is reset after restore from storage.
    pub fn reset(&mut self) {
        self.current = FsmState::Lobby;
    }
}

/// Deterministic projection from the coarse lifecycle the room exposes
/// to clients onto an FSM state.
///
/// `paused` is a modifier, not a phase: it preserves whatever state the
/// machine held before the pause. `round` disambiguates `starting`:
/// round zero is first-game setup, any later round is the between-round
/// restart phase.
pub fn project_lifecycle(lifecycle: GameLifecycle, round: u32, prior: FsmState) -> FsmState {
    match lifecycle {
        GameLifecycle::Lobby => FsmState::Lobby,
        GameLifecycle::Starting => {
            if round == 0 {
                FsmState::Setup
            } else {
                FsmState::NextRound
            }
        }
        GameLifecycle::Playing => FsmState::RoundStart,
        GameLifecycle::RoundEnd => FsmState::RoundEnd,
        GameLifecycle::GameEnd => FsmState::GameEnd,
        GameLifecycle::Paused => prior,
    }
}
