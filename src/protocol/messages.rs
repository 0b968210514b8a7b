use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error_codes::ErrorCode;
use super::types::{
    ConnectionRole, Event, GameKind, GameLifecycle, IntentId, PlayerId, RoomCode, RoomSettings,
    Roster, SoundHint, Version,
};
use crate::delta::StateDelta;
use crate::fsm::FsmState;

/// Common envelope for every inbound message.
///
/// `room_code` is absent only for the initial host handshake, which
/// creates a room rather than addressing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_code: Option<RoomCode>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Message kinds sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection and join (or create) a room.
    /// MUST be the first message on every connection.
    Handshake {
        role: ConnectionRole,
        /// Client build version for compatibility checks
        #[serde(skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
        /// Display name; required for the player role
        #[serde(skip_serializing_if = "Option::is_none")]
        player_name: Option<String>,
        /// Token from a previous session to resume as the same player
        #[serde(skip_serializing_if = "Option::is_none")]
        reconnect_token: Option<String>,
    },
    /// Request a state change (gameplay action or host command)
    Intent(IntentSubmission),
    /// Confirm receipt of a versioned broadcast
    Ack {
        version: Version,
        message_type: String,
        /// Client send time, used to derive delivery latency
        #[serde(skip_serializing_if = "Option::is_none")]
        client_timestamp: Option<DateTime<Utc>>,
    },
    /// Ask for a snapshot plus the events after it
    ReplayRequest {
        #[serde(skip_serializing_if = "Option::is_none")]
        from_version: Option<Version>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from_timestamp: Option<DateTime<Utc>>,
    },
}

/// The client-supplied portion of an intent. The submitting player and
/// room are taken from the connection, never from the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSubmission {
    pub id: IntentId,
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Outcome of processing one intent, sent to the submitter only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentResult {
    pub success: bool,
    pub intent_id: IntentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<super::types::EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IntentResult {
    pub fn ok(intent_id: IntentId, event_id: super::types::EventId, version: Version) -> Self {
        Self {
            success: true,
            intent_id,
            event_id: Some(event_id),
            version: Some(version),
            error: None,
            message: None,
        }
    }

    pub fn rejected(intent_id: IntentId, error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            intent_id,
            event_id: None,
            version: None,
            error: Some(error),
            message: Some(message.into()),
        }
    }
}

/// What a `state_sync` broadcast carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncScope {
    /// Serialized game state (full or delta)
    State,
    /// Authoritative player roster
    Roster,
    /// Room settings
    Settings,
}

/// Whether a state broadcast is complete or differential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Delta,
}

/// Payload for the StateSync server message.
/// Boxed in ServerMessage to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSyncPayload {
    pub scope: SyncScope,
    pub mode: SyncMode,
    pub version: Version,
    /// Present when `mode == Full` and `scope == State`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    /// Present when `mode == Delta`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<StateDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roster: Option<Roster>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<RoomSettings>,
    /// Sound cue for display clients on critical transitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<SoundHint>,
}

/// A decompressed snapshot as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub state: serde_json::Value,
    /// Set when the snapshot outlived its TTL but was the only one
    /// available for this catch-up
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

/// Payload for the ReplayResponse server message.
/// Boxed in ServerMessage to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayResponsePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotEnvelope>,
    /// Events strictly after the snapshot version, in order
    pub events: Vec<Event>,
    pub current_version: Version,
}

/// Payload for the Handshake reply.
/// Boxed in ServerMessage to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub player_id: PlayerId,
    pub room_code: RoomCode,
    /// True when this handshake resumed an earlier session
    pub resumed: bool,
    pub roster: Roster,
    pub lifecycle: GameLifecycle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_game: Option<GameKind>,
    pub version: Version,
    pub settings: RoomSettings,
    /// Token the client stores to reconnect as the same player
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_token: Option<String>,
}

/// Message kinds sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted (boxed to reduce enum size)
    Handshake(Box<HandshakePayload>),
    /// Outcome of a submitted intent
    IntentResult(IntentResult),
    /// An authoritative event record
    Event { event: Event },
    /// Versioned state broadcast (boxed to reduce enum size)
    StateSync(Box<StateSyncPayload>),
    /// Snapshot + catch-up events (boxed to reduce enum size)
    ReplayResponse(Box<ReplayResponsePayload>),
    /// A lifecycle transition occurred
    FsmTransition {
        from: FsmState,
        to: FsmState,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Error reply
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    /// Wire name of this message kind, as used in ACKs and schemas.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::IntentResult(_) => "intent_result",
            Self::Event { .. } => "event",
            Self::StateSync(_) => "state_sync",
            Self::ReplayResponse(_) => "replay_response",
            Self::FsmTransition { .. } => "fsm_transition",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// Outbound envelope mirroring [`ClientEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_code: Option<RoomCode>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl ServerEnvelope {
    pub fn new(room_code: Option<RoomCode>, message: ServerMessage) -> Self {
        Self {
            room_code,
            timestamp: Utc::now(),
            message,
        }
    }
}
