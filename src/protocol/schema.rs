//! Language-neutral schema export for the message grammar.
//!
//! External clients generate their parsers from this description, so
//! the export must cover every message kind on the wire. The format is
//! deliberately plain: kinds, directions, and typed fields with bounds,
//! serializable as JSON.

use serde::{Deserialize, Serialize};

use crate::config::ProtocolConfig;

/// Which side of the connection emits a message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Field type in the neutral description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    String {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_length: Option<usize>,
    },
    Integer {
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
    },
    Boolean,
    Timestamp,
    Uuid,
    /// Opaque JSON value, bounded in encoded size
    Json {
        #[serde(skip_serializing_if = "Option::is_none")]
        max_bytes: Option<usize>,
    },
    /// One of a closed set of string values
    Enum { values: Vec<String> },
    /// Homogeneous list of another type
    Array { items: Box<FieldType> },
    /// Reference to another object schema by name
    Object { schema: String },
}

/// One field of a message or object schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldSpec {
    fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
        }
    }

    fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
        }
    }
}

/// Schema of one message kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSchema {
    pub kind: String,
    pub direction: Direction,
    pub fields: Vec<FieldSpec>,
}

/// The complete exported grammar: envelope, message kinds, and shared
/// object schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaExport {
    pub schema_version: u32,
    pub envelope: Vec<FieldSpec>,
    pub messages: Vec<MessageSchema>,
    pub error_codes: Vec<String>,
}

/// Current schema revision. Bumped whenever the wire contract changes.
pub const SCHEMA_VERSION: u32 = 1;

fn enum_type(values: &[&str]) -> FieldType {
    FieldType::Enum {
        values: values.iter().map(|v| (*v).to_string()).collect(),
    }
}

/// Build the full schema export from the active protocol limits.
pub fn export(config: &ProtocolConfig) -> SchemaExport {
    let envelope = vec![
        FieldSpec::optional(
            "room_code",
            FieldType::String {
                max_length: Some(config.room.room_code_length),
            },
        ),
        FieldSpec::required("timestamp", FieldType::Timestamp),
        FieldSpec::required(
            "type",
            enum_type(&[
                "handshake",
                "intent",
                "intent_result",
                "event",
                "state_sync",
                "ack",
                "replay_request",
                "replay_response",
                "fsm_transition",
                "error",
            ]),
        ),
        FieldSpec::required("payload", FieldType::Json { max_bytes: None }),
    ];

    let messages = vec![
        MessageSchema {
            kind: "handshake".to_string(),
            direction: Direction::ClientToServer,
            fields: vec![
                FieldSpec::required(
                    "role",
                    enum_type(&["player", "host-control", "host-display"]),
                ),
                FieldSpec::optional("client_version", FieldType::String { max_length: Some(32) }),
                FieldSpec::optional(
                    "player_name",
                    FieldType::String {
                        max_length: Some(config.max_player_name_length),
                    },
                ),
                FieldSpec::optional("reconnect_token", FieldType::String { max_length: Some(128) }),
            ],
        },
        MessageSchema {
            kind: "intent".to_string(),
            direction: Direction::ClientToServer,
            fields: vec![
                FieldSpec::required("id", FieldType::Uuid),
                FieldSpec::required(
                    "action",
                    FieldType::String {
                        max_length: Some(config.max_action_length),
                    },
                ),
                FieldSpec::optional(
                    "data",
                    FieldType::Json {
                        max_bytes: Some(config.max_intent_data_bytes),
                    },
                ),
                FieldSpec::optional("version", FieldType::Integer { minimum: Some(0) }),
                FieldSpec::optional("idempotency_key", FieldType::String { max_length: Some(128) }),
            ],
        },
        MessageSchema {
            kind: "ack".to_string(),
            direction: Direction::ClientToServer,
            fields: vec![
                FieldSpec::required("version", FieldType::Integer { minimum: Some(0) }),
                FieldSpec::required("message_type", FieldType::String { max_length: Some(64) }),
                FieldSpec::optional("client_timestamp", FieldType::Timestamp),
            ],
        },
        MessageSchema {
            kind: "replay_request".to_string(),
            direction: Direction::ClientToServer,
            fields: vec![
                FieldSpec::optional("from_version", FieldType::Integer { minimum: Some(0) }),
                FieldSpec::optional("from_timestamp", FieldType::Timestamp),
            ],
        },
        MessageSchema {
            kind: "intent_result".to_string(),
            direction: Direction::ServerToClient,
            fields: vec![
                FieldSpec::required("success", FieldType::Boolean),
                FieldSpec::required("intent_id", FieldType::Uuid),
                FieldSpec::optional("event_id", FieldType::Uuid),
                FieldSpec::optional("version", FieldType::Integer { minimum: Some(0) }),
                FieldSpec::optional("error", FieldType::Object { schema: "error_code".to_string() }),
                FieldSpec::optional("message", FieldType::String { max_length: None }),
            ],
        },
        MessageSchema {
            kind: "event".to_string(),
            direction: Direction::ServerToClient,
            fields: vec![FieldSpec::required(
                "event",
                FieldType::Object { schema: "event_record".to_string() },
            )],
        },
        MessageSchema {
            kind: "state_sync".to_string(),
            direction: Direction::ServerToClient,
            fields: vec![
                FieldSpec::required("scope", enum_type(&["state", "roster", "settings"])),
                FieldSpec::required("mode", enum_type(&["full", "delta"])),
                FieldSpec::required("version", FieldType::Integer { minimum: Some(0) }),
                FieldSpec::optional("state", FieldType::Json { max_bytes: None }),
                FieldSpec::optional("delta", FieldType::Object { schema: "state_delta".to_string() }),
                FieldSpec::optional("roster", FieldType::Object { schema: "roster".to_string() }),
                FieldSpec::optional("settings", FieldType::Object { schema: "room_settings".to_string() }),
                FieldSpec::optional("hint", enum_type(&["game_start", "round_end", "game_end"])),
            ],
        },
        MessageSchema {
            kind: "replay_response".to_string(),
            direction: Direction::ServerToClient,
            fields: vec![
                FieldSpec::optional("snapshot", FieldType::Object { schema: "snapshot".to_string() }),
                FieldSpec::required(
                    "events",
                    FieldType::Array {
                        items: Box::new(FieldType::Object { schema: "event_record".to_string() }),
                    },
                ),
                FieldSpec::required("current_version", FieldType::Integer { minimum: Some(0) }),
            ],
        },
        MessageSchema {
            kind: "fsm_transition".to_string(),
            direction: Direction::ServerToClient,
            fields: vec![
                FieldSpec::required("from", enum_type(FSM_STATES)),
                FieldSpec::required("to", enum_type(FSM_STATES)),
                FieldSpec::optional("reason", FieldType::String { max_length: None }),
            ],
        },
        MessageSchema {
            kind: "error".to_string(),
            direction: Direction::ServerToClient,
            fields: vec![
                FieldSpec::required("code", FieldType::Object { schema: "error_code".to_string() }),
                FieldSpec::required("message", FieldType::String { max_length: None }),
            ],
        },
    ];

    SchemaExport {
        schema_version: SCHEMA_VERSION,
        envelope,
        messages,
        error_codes: ERROR_CODES.iter().map(|c| (*c).to_string()).collect(),
    }
}

const FSM_STATES: &[&str] = &[
    "lobby",
    "setup",
    "round_start",
    "round_end",
    "scoreboard",
    "next_round",
    "game_end",
];

const ERROR_CODES: &[&str] = &[
    "VALIDATION_FAILED",
    "UNAUTHORIZED",
    "NOT_FOUND",
    "RATE_LIMITED",
    "CONFLICT",
    "DUPLICATE",
    "TIMEOUT",
    "INTERNAL",
    "EXPIRED",
];
