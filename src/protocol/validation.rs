//! Structural validation of inbound messages.
//!
//! Every inbound envelope passes through here before any effectful
//! work. Failures are reported with a stable [`ErrorCode`] and recorded
//! to the security log by the caller.

use chrono::{Duration, Utc};

use super::error_codes::ErrorCode;
use super::messages::{ClientEnvelope, ClientMessage, IntentSubmission};
use super::room_codes;
use crate::config::ProtocolConfig;

/// A validation failure: stable code plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: ErrorCode,
    pub reason: String,
}

impl ValidationError {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ValidationFailed,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a whole inbound envelope against the message grammar.
pub fn validate_envelope(
    envelope: &ClientEnvelope,
    config: &ProtocolConfig,
) -> Result<(), ValidationError> {
    // Reject timestamps implausibly far in the future (clock skew allowance)
    let skew_limit = Utc::now() + Duration::seconds(config.max_clock_skew_secs as i64);
    if envelope.timestamp > skew_limit {
        return Err(ValidationError::failed(
            "message timestamp is too far in the future",
        ));
    }

    if let Some(code) = &envelope.room_code {
        validate_room_code(code, config)?;
    }

    match &envelope.message {
        ClientMessage::Handshake {
            player_name,
            client_version,
            ..
        } => {
            if let Some(name) = player_name {
                validate_player_name(name, config)?;
            }
            if let Some(version) = client_version {
                validate_client_version(version, config)?;
            }
            Ok(())
        }
        ClientMessage::Intent(submission) => validate_intent(submission, config),
        ClientMessage::Ack { message_type, .. } => {
            if message_type.is_empty() || message_type.len() > 64 {
                return Err(ValidationError::failed("invalid ack message_type"));
            }
            Ok(())
        }
        ClientMessage::ReplayRequest {
            from_version,
            from_timestamp,
        } => {
            if from_version.is_none() && from_timestamp.is_none() {
                return Err(ValidationError::failed(
                    "replay_request requires from_version or from_timestamp",
                ));
            }
            Ok(())
        }
    }
}

/// Validate an intent submission's structure (not its game-rule
/// semantics; the plugin does that).
pub fn validate_intent(
    submission: &IntentSubmission,
    config: &ProtocolConfig,
) -> Result<(), ValidationError> {
    if submission.action.is_empty() {
        return Err(ValidationError::failed("intent action must not be empty"));
    }
    if submission.action.len() > config.max_action_length {
        return Err(ValidationError::failed(format!(
            "intent action exceeds {} characters",
            config.max_action_length
        )));
    }
    if !submission
        .action
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ValidationError::failed(
            "intent action must be lower_snake_case",
        ));
    }

    // Bound the opaque payload so a single intent cannot exhaust memory
    let data_size = serde_json::to_vec(&submission.data)
        .map(|bytes| bytes.len())
        .unwrap_or(usize::MAX);
    if data_size > config.max_intent_data_bytes {
        return Err(ValidationError::failed(format!(
            "intent data exceeds {} bytes",
            config.max_intent_data_bytes
        )));
    }

    if let Some(key) = &submission.idempotency_key {
        if key.is_empty() || key.len() > 128 {
            return Err(ValidationError::failed("invalid idempotency key"));
        }
    }

    Ok(())
}

/// Validate a room code's shape against the configured alphabet/length.
pub fn validate_room_code(code: &str, config: &ProtocolConfig) -> Result<(), ValidationError> {
    if room_codes::is_valid_room_code(code, &config.room) {
        Ok(())
    } else {
        Err(ValidationError::failed(format!(
            "room code must be {} characters from the room-code alphabet",
            config.room.room_code_length
        )))
    }
}

/// Validate a player display name.
pub fn validate_player_name(name: &str, config: &ProtocolConfig) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::failed("player name must not be empty"));
    }
    if trimmed.chars().count() > config.max_player_name_length {
        return Err(ValidationError::failed(format!(
            "player name exceeds {} characters",
            config.max_player_name_length
        )));
    }
    if trimmed
        .chars()
        .any(|c| c.is_control() || (!c.is_alphanumeric() && !" -_".contains(c)))
    {
        return Err(ValidationError::failed(
            "player name contains unsupported characters",
        ));
    }
    Ok(())
}

/// Check the client build version against the configured minimum.
pub fn validate_client_version(
    version: &str,
    config: &ProtocolConfig,
) -> Result<(), ValidationError> {
    let Some(minimum) = &config.min_client_version else {
        return Ok(());
    };
    let parsed = semver::Version::parse(version)
        .map_err(|_| ValidationError::failed("client version is not valid semver"))?;
    if parsed < *minimum {
        return Err(ValidationError::failed(format!(
            "client version {parsed} is older than the supported minimum {minimum}"
        )));
    }
    Ok(())
}
