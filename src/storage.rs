//! Narrow persisted-state contract.
//!
//! The engine functions fully in memory; this interface only lets a
//! deployment survive restarts by reloading active rooms and reconnect
//! tokens. Every method of the no-op implementation does nothing, and
//! the engine must behave correctly with it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::protocol::{GameKind, Player, PlayerId, RoomCode, RoomSettings};

/// The durable subset of a room. Game state is not persisted; restored
/// rooms come back in the lobby.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRoom {
    pub code: RoomCode,
    pub host_id: PlayerId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_game: Option<GameKind>,
    pub players: HashMap<PlayerId, Player>,
    pub settings: RoomSettings,
}

/// A durable reconnect token record. Only the keyed digest of the token
/// is stored, never the token itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedToken {
    pub digest: String,
    pub room_code: RoomCode,
    pub player_id: PlayerId,
    pub expires_at: DateTime<Utc>,
}

/// Storage interface consumed by the dispatcher and reconnect registry.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Rooms that were live at last shutdown and have not expired.
    async fn load_active_rooms(&self) -> Result<Vec<PersistedRoom>>;

    /// Create or update a room record.
    async fn upsert_room(&self, room: &PersistedRoom) -> Result<()>;

    /// Remove a room record.
    async fn delete_room(&self, code: &RoomCode) -> Result<()>;

    /// Reconnect tokens for one room.
    async fn load_player_tokens(&self, room_code: &RoomCode) -> Result<Vec<PersistedToken>>;

    /// Persist one reconnect token digest.
    async fn save_player_token(&self, token: &PersistedToken) -> Result<()>;
}

/// Discards everything. The default when no durable backend is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl RoomStore for NoopStore {
    async fn load_active_rooms(&self) -> Result<Vec<PersistedRoom>> {
        Ok(Vec::new())
    }

    async fn upsert_room(&self, _room: &PersistedRoom) -> Result<()> {
        Ok(())
    }

    async fn delete_room(&self, _code: &RoomCode) -> Result<()> {
        Ok(())
    }

    async fn load_player_tokens(&self, _room_code: &RoomCode) -> Result<Vec<PersistedToken>> {
        Ok(Vec::new())
    }

    async fn save_player_token(&self, _token: &PersistedToken) -> Result<()> {
        Ok(())
    }
}

/// In-memory store, useful for tests and single-process restarts
/// within one lifetime (e.g. soft reload).
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rooms: RwLock<HashMap<RoomCode, PersistedRoom>>,
    tokens: RwLock<HashMap<RoomCode, Vec<PersistedToken>>>,
}

#[async_trait]
impl RoomStore for InMemoryStore {
    async fn load_active_rooms(&self) -> Result<Vec<PersistedRoom>> {
        let now = Utc::now();
        Ok(self
            .rooms
            .read()
            .await
            .values()
            .filter(|room| room.expires_at > now)
            .cloned()
            .collect())
    }

    async fn upsert_room(&self, room: &PersistedRoom) -> Result<()> {
        self.rooms
            .write()
            .await
            .insert(room.code.clone(), room.clone());
        Ok(())
    }

    async fn delete_room(&self, code: &RoomCode) -> Result<()> {
        self.rooms.write().await.remove(code);
        self.tokens.write().await.remove(code);
        Ok(())
    }

    async fn load_player_tokens(&self, room_code: &RoomCode) -> Result<Vec<PersistedToken>> {
        let now = Utc::now();
        Ok(self
            .tokens
            .read()
            .await
            .get(room_code)
            .map(|tokens| {
                tokens
                    .iter()
                    .filter(|token| token.expires_at > now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_player_token(&self, token: &PersistedToken) -> Result<()> {
        self.tokens
            .write()
            .await
            .entry(token.room_code.clone())
            .or_default()
            .push(token.clone());
        Ok(())
    }
}
