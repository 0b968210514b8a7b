use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique player identifier
pub type PlayerId = Uuid;

/// Unique intent identifier (client-generated, used for deduplication)
pub type IntentId = Uuid;

/// Unique event identifier (server-generated)
pub type EventId = Uuid;

/// Monotonic room mutation counter
pub type Version = u64;

/// Short uppercase room code, e.g. "WXYZ"
pub type RoomCode = String;

/// Role a connection declares during handshake.
///
/// The role is fixed for the lifetime of the connection and gates
/// host-scoped message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionRole {
    /// A participating player on a mobile device
    Player,
    /// The host's control surface (start/end/pause/kick)
    HostControl,
    /// A shared display that renders state but never submits intents
    HostDisplay,
}

impl ConnectionRole {
    /// Whether this role may issue host-scoped intents
    pub fn is_host(&self) -> bool {
        matches!(self, Self::HostControl)
    }
}

/// Player connection status within a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Connected,
    Disconnected,
    Spectating,
}

/// A player as tracked by the owning room.
///
/// Players refer to their room by code only; the room owns the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub status: PlayerStatus,
    pub score: i64,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Player {
    /// Create a freshly joined, connected player
    pub fn new(id: PlayerId, name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            avatar: None,
            status: PlayerStatus::Connected,
            score: 0,
            joined_at: now,
            last_seen: now,
            language: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }
}

/// Per-room settings, adjustable by the host while in the lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSettings {
    pub max_players: usize,
    /// Whether a remaining player is promoted to host when the host drops
    pub allow_host_handoff: bool,
    /// Rounds per game, passed through to the plugin context
    pub max_rounds: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_players: 50,
            allow_host_handoff: true,
            max_rounds: 5,
        }
    }
}

/// High-level room lifecycle as exposed to clients.
///
/// The fine-grained FSM state is deterministically projected from this
/// plus the round number; see [`crate::fsm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameLifecycle {
    Lobby,
    Starting,
    Playing,
    RoundEnd,
    GameEnd,
    Paused,
}

/// Known game kinds. The plugin set is closed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    Trivia,
    Buzzer,
}

/// Lifecycle status of a submitted intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Approved,
    Rejected,
    Processed,
}

/// A client's request to change room state. Immutable after submission;
/// only the intent pipeline updates `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: IntentId,
    pub player_id: PlayerId,
    pub room_code: RoomCode,
    pub action: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Client's last-seen room version, when the action is version-sensitive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    /// Host controllers may set this so repeated clicks resolve to one event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub status: IntentStatus,
}

/// Authoritative, ordered record of a state change.
///
/// `version` is the room version after applying this event. Events are
/// the only vehicle by which state changes are replayable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub kind: String,
    pub room_code: RoomCode,
    pub timestamp: DateTime<Utc>,
    pub version: Version,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<IntentId>,
}

/// Sound cue hints emitted on critical FSM transitions, consumed by
/// display clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundHint {
    GameStart,
    RoundEnd,
    GameEnd,
}

/// Directory entry describing one of a host's rooms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub code: RoomCode,
    pub host_id: PlayerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_game: Option<GameKind>,
    pub lifecycle: GameLifecycle,
    pub player_count: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Full roster snapshot broadcast after membership changes.
///
/// Per-player add/remove notifications are non-authoritative hints; this
/// broadcast is the authoritative membership record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    pub host_id: PlayerId,
    pub players: HashMap<PlayerId, Player>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_new_is_connected_with_zero_score() {
        let id = Uuid::new_v4();
        let player = Player::new(id, "Ada".to_string());
        assert_eq!(player.id, id);
        assert_eq!(player.status, PlayerStatus::Connected);
        assert_eq!(player.score, 0);
        assert!(player.joined_at <= Utc::now());
    }

    #[test]
    fn test_role_host_gate() {
        assert!(ConnectionRole::HostControl.is_host());
        assert!(!ConnectionRole::Player.is_host());
        assert!(!ConnectionRole::HostDisplay.is_host());
    }

    #[test]
    fn test_role_serialization_kebab_case() {
        let json = serde_json::to_string(&ConnectionRole::HostControl).unwrap();
        assert_eq!(json, "\"host-control\"");
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let event = Event {
            id: Uuid::new_v4(),
            kind: "answer_submitted".to_string(),
            room_code: "WXYZ".to_string(),
            timestamp: Utc::now(),
            version: 8,
            data: serde_json::json!({"choice": 2}),
            intent_id: Some(Uuid::new_v4()),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, 8);
        assert_eq!(back.kind, "answer_submitted");
        assert_eq!(back.intent_id, event.intent_id);
    }
}
