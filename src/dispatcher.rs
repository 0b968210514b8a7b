//! Room registry and message routing.
//!
//! Maintains the code-to-room map, creates rooms, restores them from
//! storage at startup, and runs the periodic garbage-collection pass
//! that prunes dead rooms and their cross-room residue (rate-limit
//! buckets). Reads vastly outnumber writes, so the map is a sharded
//! concurrent map rather than a single lock.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    generate_room_code, ErrorCode, PlayerId, RoomCode, RoomSummary,
};
use crate::rate_limit::RateLimiter;
use crate::room::{RoomHandle, RoomRuntime, RoomState, RuntimeServices};

const CODE_GENERATION_ATTEMPTS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error("could not allocate a unique room code")]
    CodeSpaceExhausted,
    #[error("host already has {0} active rooms")]
    TooManyRooms(usize),
}

/// The process-wide room directory.
pub struct Dispatcher {
    rooms: DashMap<RoomCode, RoomHandle>,
    services: RuntimeServices,
    rate_limiter: Arc<RateLimiter>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(services: RuntimeServices, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            rooms: DashMap::new(),
            services,
            rate_limiter,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a room owned by `host_id` and return its handle. The
    /// host's connection then handshakes into it normally.
    pub async fn create(
        &self,
        host_id: PlayerId,
        host_name: String,
    ) -> Result<RoomHandle, CreateError> {
        let own_rooms = self.count_rooms_of(host_id).await;
        let cap = self.services.config.protocol.room.max_rooms_per_host;
        if own_rooms >= cap {
            return Err(CreateError::TooManyRooms(own_rooms));
        }

        let code = self.allocate_code()?;
        let state = RoomState::new(
            code.clone(),
            host_id,
            host_name,
            &self.services.config.protocol.room,
        );
        let handle = RoomRuntime::spawn(state, shard_of(&code), self.services.clone());
        self.rooms.insert(code.clone(), handle.clone());
        self.services
            .metrics
            .rooms_created
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(room = %code, shard = handle.shard, %host_id, "room created");
        Ok(handle)
    }

    fn allocate_code(&self) -> Result<RoomCode, CreateError> {
        for _ in 0..CODE_GENERATION_ATTEMPTS {
            let code = generate_room_code(&self.services.config.protocol.room);
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(CreateError::CodeSpaceExhausted)
    }

    /// Resolve a room code to its handle. Unresolved codes are the
    /// caller's NOT_FOUND.
    pub fn route(&self, code: &RoomCode) -> Result<RoomHandle, ErrorCode> {
        let handle = match self.rooms.get(code) {
            Some(entry) => entry.clone(),
            None => return Err(ErrorCode::NotFound),
        };
        // The guard is released before any removal to keep the shard
        // lock ordering simple
        if handle.is_closed() {
            self.rooms.remove(code);
            return Err(ErrorCode::NotFound);
        }
        Ok(handle)
    }

    /// Restore persisted rooms at startup, including their reconnect
    /// tokens, so clients can resume across a restart.
    pub async fn restore_from_storage(&self) {
        let rooms = match self.services.store.load_active_rooms().await {
            Ok(rooms) => rooms,
            Err(error) => {
                tracing::error!(%error, "failed to load persisted rooms");
                return;
            }
        };

        for persisted in rooms {
            let code = persisted.code.clone();
            match self.services.store.load_player_tokens(&code).await {
                Ok(tokens) => self.services.reconnect.restore(tokens),
                Err(error) => {
                    tracing::warn!(room = %code, %error, "failed to load reconnect tokens");
                }
            }

            let state = RoomState::restore(persisted);
            let handle = RoomRuntime::spawn(state, shard_of(&code), self.services.clone());
            self.rooms.insert(code.clone(), handle);
            self.services
                .metrics
                .rooms_restored
                .fetch_add(1, Ordering::Relaxed);
            tracing::info!(room = %code, "room restored from storage");
        }
    }

    /// Directory query: the active rooms a host owns.
    pub async fn rooms_of(&self, host_id: PlayerId) -> Vec<RoomSummary> {
        let handles: Vec<RoomHandle> =
            self.rooms.iter().map(|entry| entry.value().clone()).collect();
        let mut summaries = Vec::new();
        for handle in handles {
            if let Some(summary) = handle.summary().await {
                if summary.host_id == host_id {
                    summaries.push(summary);
                }
            }
        }
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    async fn count_rooms_of(&self, host_id: PlayerId) -> usize {
        self.rooms_of(host_id).await.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Prune rooms whose loops have ended (expired or destroyed) and
    /// cascade-clear their cross-room residue.
    pub fn sweep(&self) {
        let dead: Vec<RoomCode> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().is_closed())
            .map(|entry| entry.key().clone())
            .collect();
        for code in dead {
            self.rooms.remove(&code);
            self.rate_limiter.clear_room(&code);
            tracing::debug!(room = %code, "pruned finished room");
        }
        self.rate_limiter.sweep();
        self.services.dedup.sweep();
    }

    /// Start the periodic GC pass. Runs until shutdown.
    pub fn spawn_gc(self: &Arc<Self>) {
        let dispatcher = Arc::clone(self);
        let interval =
            Duration::from_secs(self.services.config.protocol.room.gc_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => dispatcher.sweep(),
                    _ = dispatcher.shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Graceful shutdown: ask every room to stop, then wait for their
    /// queues to drain within the deadline before giving up.
    pub async fn shutdown(&self, drain: Duration) {
        self.shutdown.cancel();
        for entry in self.rooms.iter() {
            entry.value().destroy("server shutting down");
        }

        let deadline = tokio::time::Instant::now() + drain;
        loop {
            let open = self
                .rooms
                .iter()
                .filter(|entry| !entry.value().is_closed())
                .count();
            if open == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(open, "drain deadline reached; abandoning room queues");
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.rooms.clear();
    }
}

/// Stable shard id for a room code. Purely informational within one
/// instance; a cluster layer routes connections with it.
pub fn shard_of(code: &RoomCode) -> u32 {
    let digest = Sha256::digest(code.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
