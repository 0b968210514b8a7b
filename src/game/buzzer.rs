//! Buzz-in game: first connected player to buzz holds the floor, the
//! host awards points and re-arms for the next buzz.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use super::context::{EventProposal, IntentEffects, PluginContext, RenderDescriptor};
use super::GamePlugin;
use crate::fsm::FsmState;
use crate::protocol::{Event, Intent, PlayerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BuzzerPhase {
    Armed,
    Locked,
}

#[derive(Debug)]
pub struct BuzzerGame {
    phase: BuzzerPhase,
    /// Buzzes in arrival order; the first holds the floor
    buzz_order: Vec<PlayerId>,
    /// Points handed out this round, for the scoreboard view
    awarded: HashMap<PlayerId, i64>,
}

impl Default for BuzzerGame {
    fn default() -> Self {
        Self {
            phase: BuzzerPhase::Armed,
            buzz_order: Vec::new(),
            awarded: HashMap::new(),
        }
    }
}

impl BuzzerGame {
    fn floor_holder(&self) -> Option<PlayerId> {
        self.buzz_order.first().copied()
    }
}

impl GamePlugin for BuzzerGame {
    fn init(&mut self, _ctx: &PluginContext<'_>) {
        self.phase = BuzzerPhase::Armed;
        self.buzz_order.clear();
        self.awarded.clear();
    }

    fn validate(&self, intent: &Intent, ctx: &PluginContext<'_>) -> Result<(), String> {
        match intent.action.as_str() {
            "buzz" => {
                if !ctx.can_play(intent.player_id) {
                    return Err("only connected players may buzz".to_string());
                }
                if ctx.fsm_state != FsmState::RoundStart {
                    return Err("buzzing is closed".to_string());
                }
                if self.buzz_order.contains(&intent.player_id) {
                    return Err("you already buzzed".to_string());
                }
                Ok(())
            }
            "award" => {
                if intent.player_id != ctx.host_id {
                    return Err("only the host may award points".to_string());
                }
                let target: PlayerId = intent.data["player_id"]
                    .as_str()
                    .and_then(|raw| raw.parse().ok())
                    .ok_or_else(|| "award requires a 'player_id'".to_string())?;
                if !ctx.players.contains_key(&target) {
                    return Err("awarded player is not in the room".to_string());
                }
                if !self.buzz_order.contains(&target) {
                    return Err("awarded player did not buzz".to_string());
                }
                Ok(())
            }
            "rearm" => {
                if intent.player_id != ctx.host_id {
                    return Err("only the host may re-arm the buzzer".to_string());
                }
                Ok(())
            }
            other => Err(format!("unknown buzzer action '{other}'")),
        }
    }

    fn on_intent(
        &self,
        intent: &Intent,
        _ctx: &PluginContext<'_>,
    ) -> Result<IntentEffects, String> {
        match intent.action.as_str() {
            "buzz" => Ok(IntentEffects::event(EventProposal::new(
                "buzz_registered",
                json!({"player": intent.player_id}),
            ))),
            "award" => {
                let target = intent.data["player_id"].as_str().unwrap_or_default();
                let points = intent.data["points"].as_i64().unwrap_or(10);
                Ok(IntentEffects::event(EventProposal::new(
                    "points_awarded",
                    json!({
                        "score_awards": { (target): points },
                    }),
                )))
            }
            "rearm" => Ok(IntentEffects::event(EventProposal::new(
                "buzzer_armed",
                json!({}),
            ))),
            other => Err(format!("unknown buzzer action '{other}'")),
        }
    }

    fn apply_event(&mut self, event: &Event, _ctx: &PluginContext<'_>) {
        match event.kind.as_str() {
            "buzz_registered" => {
                if let Some(player) = event.data["player"]
                    .as_str()
                    .and_then(|raw| raw.parse::<PlayerId>().ok())
                {
                    if !self.buzz_order.contains(&player) {
                        self.buzz_order.push(player);
                    }
                    self.phase = BuzzerPhase::Locked;
                }
            }
            "points_awarded" => {
                if let Some(awards) = event.data["score_awards"].as_object() {
                    for (raw, points) in awards {
                        if let Ok(player) = raw.parse::<PlayerId>() {
                            self.awarded
                                .insert(player, points.as_i64().unwrap_or_default());
                        }
                    }
                }
            }
            "buzzer_armed" | "round_started" => {
                self.phase = BuzzerPhase::Armed;
                self.buzz_order.clear();
            }
            _ => {}
        }
    }

    fn serialize_state(
        &self,
        ctx: &PluginContext<'_>,
        _viewer: Option<PlayerId>,
    ) -> serde_json::Value {
        json!({
            "game": "buzzer",
            "round": ctx.round,
            "max_rounds": ctx.max_rounds,
            "phase": self.phase,
            "floor": self.floor_holder().map(|id| id.to_string()),
            "buzz_order": self.buzz_order.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "awarded": self.awarded.iter()
                .map(|(id, points)| (id.to_string(), json!(points)))
                .collect::<serde_json::Map<_, _>>(),
        })
    }

    fn render_descriptor(&self) -> RenderDescriptor {
        RenderDescriptor {
            layout: "buzzer-stack".to_string(),
            hints: json!({ "pulse": self.phase == BuzzerPhase::Armed }),
        }
    }

    fn migrate_player(&mut self, old: PlayerId, new: PlayerId) {
        for slot in &mut self.buzz_order {
            if *slot == old {
                *slot = new;
            }
        }
        if let Some(points) = self.awarded.remove(&old) {
            self.awarded.insert(new, points);
        }
    }

    fn cleanup(&mut self) {
        self.buzz_order.clear();
        self.awarded.clear();
        self.phase = BuzzerPhase::Armed;
    }
}
