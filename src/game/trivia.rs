//! Multiple-choice trivia.
//!
//! Each round asks one question. Players answer once; the host reveals
//! (or arms an auto-reveal timer), correct answers score, and the
//! runtime advances the round. The correct answer is hidden from player
//! views until reveal.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use super::context::{
    EventProposal, IntentEffects, PluginContext, RenderDescriptor, TimerRequest,
};
use super::GamePlugin;
use crate::fsm::FsmState;
use crate::protocol::{Event, Intent, PlayerId};

pub const POINTS_PER_CORRECT_ANSWER: i64 = 100;
const AUTO_REVEAL_TIMER: &str = "auto_reveal";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    pub choices: Vec<String>,
    pub correct: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RoundPhase {
    Asking,
    Revealed,
}

/// In-memory trivia state. Scores live on the room's players; this
/// tracks only per-round progress.
#[derive(Debug)]
pub struct TriviaGame {
    questions: Vec<Question>,
    phase: RoundPhase,
    answers: HashMap<PlayerId, usize>,
}

impl Default for TriviaGame {
    fn default() -> Self {
        Self {
            questions: default_questions(),
            phase: RoundPhase::Asking,
            answers: HashMap::new(),
        }
    }
}

impl TriviaGame {
    fn current_question(&self, round: u32) -> Option<&Question> {
        let index = (round.max(1) as usize - 1) % self.questions.len().max(1);
        self.questions.get(index)
    }

    fn compute_awards(&self, round: u32) -> serde_json::Map<String, serde_json::Value> {
        let correct = self
            .current_question(round)
            .map(|question| question.correct);
        self.answers
            .iter()
            .filter(|(_, choice)| Some(**choice) == correct)
            .map(|(player, _)| (player.to_string(), json!(POINTS_PER_CORRECT_ANSWER)))
            .collect()
    }
}

impl GamePlugin for TriviaGame {
    fn init(&mut self, ctx: &PluginContext<'_>) {
        self.phase = RoundPhase::Asking;
        self.answers.clear();
        tracing::debug!(room = %ctx.room_code, questions = self.questions.len(), "trivia initialized");
    }

    fn validate(&self, intent: &Intent, ctx: &PluginContext<'_>) -> Result<(), String> {
        match intent.action.as_str() {
            "answer" => {
                if !ctx.can_play(intent.player_id) {
                    return Err("only connected players may answer".to_string());
                }
                if ctx.fsm_state != FsmState::RoundStart || self.phase != RoundPhase::Asking {
                    return Err("answers are closed".to_string());
                }
                if self.answers.contains_key(&intent.player_id) {
                    return Err("you already answered this round".to_string());
                }
                let choice = intent.data["choice"]
                    .as_u64()
                    .ok_or_else(|| "answer requires a numeric 'choice'".to_string())?;
                let question = self
                    .current_question(ctx.round)
                    .ok_or_else(|| "no active question".to_string())?;
                if choice as usize >= question.choices.len() {
                    return Err(format!(
                        "choice {} is out of range for {} options",
                        choice,
                        question.choices.len()
                    ));
                }
                Ok(())
            }
            "reveal" => {
                if intent.player_id != ctx.host_id {
                    return Err("only the host may reveal".to_string());
                }
                if self.phase != RoundPhase::Asking {
                    return Err("round already revealed".to_string());
                }
                Ok(())
            }
            "start_timer" => {
                if intent.player_id != ctx.host_id {
                    return Err("only the host may start the timer".to_string());
                }
                let seconds = intent.data["seconds"].as_u64().unwrap_or(0);
                if !(1..=600).contains(&seconds) {
                    return Err("timer must be between 1 and 600 seconds".to_string());
                }
                Ok(())
            }
            other => Err(format!("unknown trivia action '{other}'")),
        }
    }

    fn on_intent(
        &self,
        intent: &Intent,
        ctx: &PluginContext<'_>,
    ) -> Result<IntentEffects, String> {
        match intent.action.as_str() {
            "answer" => {
                let choice = intent.data["choice"].as_u64().unwrap_or(0);
                Ok(IntentEffects::event(EventProposal::new(
                    "answer_submitted",
                    json!({
                        "player": intent.player_id,
                        "choice": choice,
                    }),
                )))
            }
            "reveal" => {
                let question = self
                    .current_question(ctx.round)
                    .ok_or_else(|| "no active question".to_string())?;
                let awards = self.compute_awards(ctx.round);
                let mut effects = IntentEffects::event(EventProposal::new(
                    "answers_revealed",
                    json!({
                        "correct": question.correct,
                        "score_awards": awards,
                    }),
                ));
                effects.cancel_timers.push(AUTO_REVEAL_TIMER.to_string());
                Ok(effects)
            }
            "start_timer" => {
                let seconds = intent.data["seconds"].as_u64().unwrap_or(30);
                Ok(IntentEffects::none().with_timer(TimerRequest {
                    name: AUTO_REVEAL_TIMER.to_string(),
                    after: Duration::from_secs(seconds),
                    action: "reveal".to_string(),
                    data: json!({}),
                }))
            }
            other => Err(format!("unknown trivia action '{other}'")),
        }
    }

    fn apply_event(&mut self, event: &Event, _ctx: &PluginContext<'_>) {
        match event.kind.as_str() {
            "answer_submitted" => {
                if let (Some(player), Some(choice)) = (
                    event.data["player"]
                        .as_str()
                        .and_then(|raw| raw.parse().ok()),
                    event.data["choice"].as_u64(),
                ) {
                    self.answers.insert(player, choice as usize);
                }
            }
            "answers_revealed" => {
                self.phase = RoundPhase::Revealed;
            }
            "round_started" => {
                self.phase = RoundPhase::Asking;
                self.answers.clear();
            }
            _ => {}
        }
    }

    fn serialize_state(
        &self,
        ctx: &PluginContext<'_>,
        viewer: Option<PlayerId>,
    ) -> serde_json::Value {
        let question = self.current_question(ctx.round);
        let reveal_to_viewer =
            self.phase == RoundPhase::Revealed || viewer == Some(ctx.host_id);

        let mut state = json!({
            "game": "trivia",
            "round": ctx.round,
            "max_rounds": ctx.max_rounds,
            "phase": self.phase,
            "answered": self.answers.keys().map(ToString::to_string).collect::<Vec<_>>(),
        });

        if let Some(question) = question {
            state["question"] = json!({
                "prompt": question.prompt,
                "choices": question.choices,
            });
            if reveal_to_viewer {
                state["correct"] = json!(question.correct);
            }
        }

        state
    }

    fn render_descriptor(&self) -> RenderDescriptor {
        RenderDescriptor {
            layout: "question-grid".to_string(),
            hints: json!({
                "show_timer": self.phase == RoundPhase::Asking,
                "celebrate": self.phase == RoundPhase::Revealed,
            }),
        }
    }

    fn migrate_player(&mut self, old: PlayerId, new: PlayerId) {
        if let Some(choice) = self.answers.remove(&old) {
            self.answers.insert(new, choice);
        }
    }

    fn cleanup(&mut self) {
        self.answers.clear();
        self.phase = RoundPhase::Asking;
    }
}

fn default_questions() -> Vec<Question> {
    vec![
        Question {
            prompt: "Which planet has the most moons?".to_string(),
            choices: vec![
                "Earth".to_string(),
                "Saturn".to_string(),
                "Mars".to_string(),
                "Venus".to_string(),
            ],
            correct: 1,
        },
        Question {
            prompt: "What is the largest ocean?".to_string(),
            choices: vec![
                "Atlantic".to_string(),
                "Indian".to_string(),
                "Pacific".to_string(),
                "Arctic".to_string(),
            ],
            correct: 2,
        },
        Question {
            prompt: "How many strings does a standard violin have?".to_string(),
            choices: vec!["4".to_string(), "5".to_string(), "6".to_string(), "7".to_string()],
            correct: 0,
        },
        Question {
            prompt: "Which element has the symbol 'Au'?".to_string(),
            choices: vec![
                "Silver".to_string(),
                "Gold".to_string(),
                "Aluminium".to_string(),
                "Argon".to_string(),
            ],
            correct: 1,
        },
        Question {
            prompt: "In which year did the first person walk on the Moon?".to_string(),
            choices: vec![
                "1965".to_string(),
                "1969".to_string(),
                "1972".to_string(),
                "1975".to_string(),
            ],
            correct: 1,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{IntentStatus, Player, RoomCode};
    use chrono::Utc;
    use uuid::Uuid;

    struct Fixture {
        room_code: RoomCode,
        players: HashMap<PlayerId, Player>,
        host_id: PlayerId,
    }

    impl Fixture {
        fn new() -> (Self, PlayerId) {
            let host_id = Uuid::new_v4();
            let player_id = Uuid::new_v4();
            let mut players = HashMap::new();
            players.insert(host_id, Player::new(host_id, "Host".to_string()));
            players.insert(player_id, Player::new(player_id, "Ada".to_string()));
            (
                Self {
                    room_code: "WXYZ".to_string(),
                    players,
                    host_id,
                },
                player_id,
            )
        }

        fn ctx(&self, fsm_state: FsmState, round: u32) -> PluginContext<'_> {
            PluginContext {
                room_code: &self.room_code,
                players: &self.players,
                host_id: self.host_id,
                game: crate::protocol::GameKind::Trivia,
                fsm_state,
                round,
                max_rounds: 5,
            }
        }
    }

    fn intent(player_id: PlayerId, action: &str, data: serde_json::Value) -> Intent {
        Intent {
            id: Uuid::new_v4(),
            player_id,
            room_code: "WXYZ".to_string(),
            action: action.to_string(),
            data,
            timestamp: Utc::now(),
            version: None,
            idempotency_key: None,
            status: IntentStatus::Pending,
        }
    }

    fn apply_proposal(game: &mut TriviaGame, ctx: &PluginContext<'_>, effects: &IntentEffects) {
        let proposal = effects.event.as_ref().expect("event proposed");
        let event = Event {
            id: proposal.id,
            kind: proposal.kind.clone(),
            room_code: "WXYZ".to_string(),
            timestamp: Utc::now(),
            version: 1,
            data: proposal.data.clone(),
            intent_id: None,
        };
        game.apply_event(&event, ctx);
    }

    #[test]
    fn test_answer_validates_and_records() {
        let (fixture, player_id) = Fixture::new();
        let mut game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);

        let answer = intent(player_id, "answer", json!({"choice": 1}));
        game.validate(&answer, &ctx).expect("valid answer");
        let effects = game.on_intent(&answer, &ctx).expect("effects");
        apply_proposal(&mut game, &ctx, &effects);

        assert_eq!(game.answers.get(&player_id), Some(&1));
    }

    #[test]
    fn test_second_answer_rejected() {
        let (fixture, player_id) = Fixture::new();
        let mut game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);

        let first = intent(player_id, "answer", json!({"choice": 0}));
        let effects = game.on_intent(&first, &ctx).unwrap();
        apply_proposal(&mut game, &ctx, &effects);

        let second = intent(player_id, "answer", json!({"choice": 2}));
        assert!(game.validate(&second, &ctx).is_err());
    }

    #[test]
    fn test_out_of_range_choice_rejected() {
        let (fixture, player_id) = Fixture::new();
        let game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);

        let answer = intent(player_id, "answer", json!({"choice": 99}));
        assert!(game.validate(&answer, &ctx).is_err());
    }

    #[test]
    fn test_answers_closed_outside_round() {
        let (fixture, player_id) = Fixture::new();
        let game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::Scoreboard, 1);
        let answer = intent(player_id, "answer", json!({"choice": 0}));
        assert!(game.validate(&answer, &ctx).is_err());
    }

    #[test]
    fn test_reveal_awards_correct_answers_only() {
        let (fixture, player_id) = Fixture::new();
        let mut game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);
        // Round 1 question: correct answer is choice 1
        let right = intent(player_id, "answer", json!({"choice": 1}));
        let effects = game.on_intent(&right, &ctx).unwrap();
        apply_proposal(&mut game, &ctx, &effects);

        let wrong_player = fixture.host_id;
        let wrong = intent(wrong_player, "answer", json!({"choice": 0}));
        let effects = game.on_intent(&wrong, &ctx).unwrap();
        apply_proposal(&mut game, &ctx, &effects);

        let reveal = intent(fixture.host_id, "reveal", json!({}));
        let effects = game.on_intent(&reveal, &ctx).unwrap();
        let proposal = effects.event.as_ref().unwrap();
        assert_eq!(proposal.kind, "answers_revealed");

        let awards = proposal.data["score_awards"].as_object().unwrap();
        assert_eq!(awards.len(), 1);
        assert_eq!(
            awards[&player_id.to_string()],
            json!(POINTS_PER_CORRECT_ANSWER)
        );
        assert!(effects
            .cancel_timers
            .contains(&AUTO_REVEAL_TIMER.to_string()));
    }

    #[test]
    fn test_reveal_is_host_scoped() {
        let (fixture, player_id) = Fixture::new();
        let game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);
        assert!(game.validate(&intent(player_id, "reveal", json!({})), &ctx).is_err());
        assert!(game
            .validate(&intent(fixture.host_id, "reveal", json!({})), &ctx)
            .is_ok());
    }

    #[test]
    fn test_apply_event_is_idempotent() {
        let (fixture, player_id) = Fixture::new();
        let mut game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);

        let answer = intent(player_id, "answer", json!({"choice": 1}));
        let effects = game.on_intent(&answer, &ctx).unwrap();
        apply_proposal(&mut game, &ctx, &effects);
        apply_proposal(&mut game, &ctx, &effects);

        assert_eq!(game.answers.len(), 1);
        assert_eq!(game.answers.get(&player_id), Some(&1));
    }

    #[test]
    fn test_round_started_resets_round_state() {
        let (fixture, player_id) = Fixture::new();
        let mut game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);

        let answer = intent(player_id, "answer", json!({"choice": 1}));
        let effects = game.on_intent(&answer, &ctx).unwrap();
        apply_proposal(&mut game, &ctx, &effects);

        let round_started = Event {
            id: Uuid::new_v4(),
            kind: "round_started".to_string(),
            room_code: "WXYZ".to_string(),
            timestamp: Utc::now(),
            version: 2,
            data: json!({"round": 2}),
            intent_id: None,
        };
        game.apply_event(&round_started, &ctx);

        assert!(game.answers.is_empty());
        assert_eq!(game.phase, RoundPhase::Asking);
    }

    #[test]
    fn test_correct_answer_hidden_from_players_until_reveal() {
        let (fixture, player_id) = Fixture::new();
        let mut game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);

        let player_view = game.serialize_state(&ctx, Some(player_id));
        assert!(player_view.get("correct").is_none());
        let host_view = game.serialize_state(&ctx, Some(fixture.host_id));
        assert_eq!(host_view["correct"], json!(1));

        let reveal = intent(fixture.host_id, "reveal", json!({}));
        let effects = game.on_intent(&reveal, &ctx).unwrap();
        apply_proposal(&mut game, &ctx, &effects);

        let player_view = game.serialize_state(&ctx, Some(player_id));
        assert_eq!(player_view["correct"], json!(1));
    }

    #[test]
    fn test_start_timer_schedules_auto_reveal() {
        let (fixture, _) = Fixture::new();
        let game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);

        let start = intent(fixture.host_id, "start_timer", json!({"seconds": 20}));
        game.validate(&start, &ctx).expect("host may arm timer");
        let effects = game.on_intent(&start, &ctx).unwrap();
        assert!(effects.event.is_none());
        assert_eq!(effects.timers.len(), 1);
        assert_eq!(effects.timers[0].action, "reveal");
        assert_eq!(effects.timers[0].after, Duration::from_secs(20));
    }

    #[test]
    fn test_migrate_player_moves_answer() {
        let (fixture, player_id) = Fixture::new();
        let mut game = TriviaGame::default();
        let ctx = fixture.ctx(FsmState::RoundStart, 1);

        let answer = intent(player_id, "answer", json!({"choice": 1}));
        let effects = game.on_intent(&answer, &ctx).unwrap();
        apply_proposal(&mut game, &ctx, &effects);

        let new_id = Uuid::new_v4();
        game.migrate_player(player_id, new_id);
        assert!(game.answers.get(&player_id).is_none());
        assert_eq!(game.answers.get(&new_id), Some(&1));
    }
}
