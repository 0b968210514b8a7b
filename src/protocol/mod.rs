//! Wire protocol: message kinds, validation, stable error codes, room
//! codes, and the language-neutral schema export.

pub mod error_codes;
pub mod messages;
pub mod room_codes;
pub mod schema;
pub mod types;
pub mod validation;

pub use error_codes::ErrorCode;

pub use messages::{
    ClientEnvelope, ClientMessage, HandshakePayload, IntentResult, IntentSubmission,
    ReplayResponsePayload, ServerEnvelope, ServerMessage, SnapshotEnvelope, StateSyncPayload,
    SyncMode, SyncScope,
};

pub use room_codes::{generate_room_code, is_valid_room_code};

pub use types::{
    ConnectionRole, Event, EventId, GameKind, GameLifecycle, Intent, IntentId, IntentStatus,
    Player, PlayerId, PlayerStatus, RoomCode, RoomSettings, RoomSummary, Roster, SoundHint,
    Version,
};

pub use validation::{validate_envelope, validate_intent, ValidationError};
