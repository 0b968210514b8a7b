//! Reconnect tokens and session resumption.
//!
//! On join, every player receives an opaque token. Presenting it on a
//! later handshake resumes their identity: the runtime assigns a fresh
//! player id and migrates the old record to it. Only a keyed digest of
//! each token is kept server-side, so neither memory dumps nor the
//! storage backend can reproduce valid tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::protocol::{PlayerId, RoomCode};
use crate::storage::PersistedToken;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
struct TokenRecord {
    room_code: RoomCode,
    player_id: PlayerId,
    expires_at: DateTime<Utc>,
}

/// Issues and resolves reconnect tokens. One registry serves every
/// room; records are scoped by room code.
pub struct ReconnectRegistry {
    /// Keyed-digest -> token record
    records: Mutex<HashMap<String, TokenRecord>>,
    /// Process secret for the token digest; regenerating it on restart
    /// is acceptable because persisted digests are keyed with it only
    /// when the same secret is supplied at startup
    secret: Vec<u8>,
    ttl: Duration,
}

impl ReconnectRegistry {
    pub fn new(ttl: std::time::Duration) -> Self {
        let mut secret = vec![0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::with_secret(secret, ttl)
    }

    /// Build with an explicit secret so digests persisted by a previous
    /// process remain resolvable.
    pub fn with_secret(secret: Vec<u8>, ttl: std::time::Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            secret,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(6)),
        }
    }

    fn digest(&self, token: &str) -> String {
        // Keyed digest: storage leaks cannot be replayed as tokens.
        // HMAC accepts keys of any length, so construction cannot fail.
        #[allow(clippy::expect_used)]
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(token.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Issue a token for `(room, player)`. Returns the token and its
    /// durable record for the storage layer.
    pub fn issue(&self, room_code: &RoomCode, player_id: PlayerId) -> (String, PersistedToken) {
        let mut raw = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut raw);
        let token = URL_SAFE_NO_PAD.encode(raw);
        let digest = self.digest(&token);
        let expires_at = Utc::now() + self.ttl;

        if let Ok(mut records) = self.records.lock() {
            records.insert(
                digest.clone(),
                TokenRecord {
                    room_code: room_code.clone(),
                    player_id,
                    expires_at,
                },
            );
        }

        let persisted = PersistedToken {
            digest,
            room_code: room_code.clone(),
            player_id,
            expires_at,
        };
        (token, persisted)
    }

    /// Resolve a presented token for a room. A hit consumes the record:
    /// each token resumes a session at most once.
    pub fn resolve(&self, room_code: &RoomCode, token: &str) -> Option<PlayerId> {
        let digest = self.digest(token);
        let mut records = self.records.lock().ok()?;
        match records.get(&digest) {
            Some(record) if record.room_code == *room_code && record.expires_at > Utc::now() => {
                let player_id = record.player_id;
                records.remove(&digest);
                Some(player_id)
            }
            Some(record) if record.expires_at <= Utc::now() => {
                records.remove(&digest);
                None
            }
            _ => None,
        }
    }

    /// Reload records persisted by an earlier process.
    pub fn restore(&self, tokens: Vec<PersistedToken>) {
        if let Ok(mut records) = self.records.lock() {
            for token in tokens {
                records.insert(
                    token.digest,
                    TokenRecord {
                        room_code: token.room_code,
                        player_id: token.player_id,
                        expires_at: token.expires_at,
                    },
                );
            }
        }
    }

    /// Drop records of a destroyed room; sweep expired ones.
    pub fn clear_room(&self, room_code: &RoomCode) {
        if let Ok(mut records) = self.records.lock() {
            let now = Utc::now();
            records.retain(|_, record| {
                record.room_code != *room_code && record.expires_at > now
            });
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
