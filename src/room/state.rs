//! Authoritative per-room state.

use chrono::{DateTime, Duration, Utc};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};

use crate::config::RoomConfig;
use crate::protocol::{
    GameKind, GameLifecycle, Player, PlayerId, PlayerStatus, RoomCode, RoomSettings, RoomSummary,
    Roster, Version,
};
use crate::storage::PersistedRoom;

/// Everything a room owns: players, settings, lifecycle, and the
/// version counter. Only the room runtime writes any of it.
#[derive(Debug)]
pub struct RoomState {
    pub code: RoomCode,
    pub host_id: PlayerId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub current_game: Option<GameKind>,
    pub lifecycle: GameLifecycle,
    pub round: u32,
    pub players: HashMap<PlayerId, Player>,
    /// Display connections: receive broadcasts, never submit intents,
    /// and are not part of the roster
    pub observers: HashSet<PlayerId>,
    pub settings: RoomSettings,
    pub version: Version,
    pub last_mutation: DateTime<Utc>,
}

impl RoomState {
    pub fn new(code: RoomCode, host_id: PlayerId, host_name: String, config: &RoomConfig) -> Self {
        let now = Utc::now();
        let mut players = HashMap::new();
        players.insert(host_id, Player::new(host_id, host_name));
        Self {
            code,
            host_id,
            created_at: now,
            expires_at: now + Duration::hours(config.expiration_hours as i64),
            current_game: None,
            lifecycle: GameLifecycle::Lobby,
            round: 0,
            players,
            observers: HashSet::new(),
            settings: RoomSettings {
                max_players: config.max_players,
                allow_host_handoff: config.allow_host_handoff,
                max_rounds: config.max_rounds,
            },
            version: 0,
            last_mutation: now,
        }
    }

    /// Rebuild a room from its durable record. Restored rooms come back
    /// in the lobby with everyone marked disconnected until they
    /// re-handshake.
    pub fn restore(persisted: PersistedRoom) -> Self {
        let mut players = persisted.players;
        for player in players.values_mut() {
            player.status = PlayerStatus::Disconnected;
        }
        Self {
            code: persisted.code,
            host_id: persisted.host_id,
            created_at: persisted.created_at,
            expires_at: persisted.expires_at,
            current_game: None,
            lifecycle: GameLifecycle::Lobby,
            round: 0,
            players,
            observers: HashSet::new(),
            settings: persisted.settings,
            version: 0,
            last_mutation: Utc::now(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Increment the version for one applied event. The only call site
    /// is the intent pipeline.
    pub fn bump_version(&mut self) -> Version {
        self.version += 1;
        self.last_mutation = Utc::now();
        self.version
    }

    pub fn is_member(&self, player_id: PlayerId) -> bool {
        self.players.contains_key(&player_id)
    }

    pub fn roster(&self) -> Roster {
        Roster {
            host_id: self.host_id,
            players: self.players.clone(),
        }
    }

    /// Everyone broadcasts reach: connected players plus observers.
    /// Stack-allocated up to a typical party size.
    pub fn recipients(&self) -> SmallVec<[PlayerId; 8]> {
        self.players
            .values()
            .filter(|player| player.status != PlayerStatus::Disconnected)
            .map(|player| player.id)
            .chain(self.observers.iter().copied())
            .collect()
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            code: self.code.clone(),
            host_id: self.host_id,
            current_game: self.current_game,
            lifecycle: self.lifecycle,
            player_count: self.players.len(),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }

    pub fn to_persisted(&self) -> PersistedRoom {
        PersistedRoom {
            code: self.code.clone(),
            host_id: self.host_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
            current_game: self.current_game,
            players: self.players.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn state() -> RoomState {
        RoomState::new(
            "WXYZ".to_string(),
            Uuid::new_v4(),
            "Host".to_string(),
            &RoomConfig::default(),
        )
    }

    #[test]
    fn test_new_room_contains_host_in_lobby() {
        let state = state();
        assert_eq!(state.version, 0);
        assert_eq!(state.lifecycle, GameLifecycle::Lobby);
        assert!(state.is_member(state.host_id));
        assert_eq!(state.players.len(), 1);
    }

    #[test]
    fn test_version_bumps_are_sequential() {
        let mut state = state();
        assert_eq!(state.bump_version(), 1);
        assert_eq!(state.bump_version(), 2);
        assert!(state.last_mutation <= Utc::now());
    }

    #[test]
    fn test_expiry_window() {
        let mut state = state();
        assert!(!state.is_expired(Utc::now()));
        state.expires_at = Utc::now() - Duration::seconds(1);
        assert!(state.is_expired(Utc::now()));
    }

    #[test]
    fn test_recipients_skip_disconnected_players() {
        let mut state = state();
        let gone = Uuid::new_v4();
        let mut player = Player::new(gone, "Gone".to_string());
        player.status = PlayerStatus::Disconnected;
        state.players.insert(gone, player);

        let display = Uuid::new_v4();
        state.observers.insert(display);

        let recipients = state.recipients();
        assert!(recipients.contains(&state.host_id));
        assert!(recipients.contains(&display));
        assert!(!recipients.contains(&gone));
    }

    #[test]
    fn test_restore_marks_players_disconnected() {
        let state = state();
        let restored = RoomState::restore(state.to_persisted());
        assert_eq!(restored.code, "WXYZ");
        assert!(restored
            .players
            .values()
            .all(|player| player.status == PlayerStatus::Disconnected));
        assert_eq!(restored.version, 0);
        assert_eq!(restored.lifecycle, GameLifecycle::Lobby);
    }
}
