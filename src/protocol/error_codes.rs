use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error codes for structured error handling.
///
/// These codes are part of the wire contract; clients branch on them
/// programmatically, so variants are never renamed or removed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Message or intent failed schema/rules check
    ValidationFailed,
    /// Connection lacks the role required for the action
    Unauthorized,
    /// Room or player missing
    NotFound,
    /// Rate limiter rejected the request
    RateLimited,
    /// Stale version submitted where a version was required
    Conflict,
    /// Intent id already processed; the prior result is returned
    Duplicate,
    /// ACK wait expired; internal, drives resync
    Timeout,
    /// Unexpected plugin or runtime failure
    Internal,
    /// Room past its TTL
    Expired,
}

impl ErrorCode {
    /// Returns a human-readable description suitable for client display.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ValidationFailed => {
                "The message or intent failed validation. Check the request fields and the current game rules."
            }
            Self::Unauthorized => {
                "This connection does not have the role required for that action."
            }
            Self::NotFound => {
                "The requested room or player could not be found. The room may have closed or the code is incorrect."
            }
            Self::RateLimited => {
                "Too many requests in a short time. Please slow down and try again."
            }
            Self::Conflict => {
                "The submitted version is stale. Resynchronize and retry with the current state."
            }
            Self::Duplicate => {
                "This intent was already processed. The original result has been returned."
            }
            Self::Timeout => {
                "A delivery acknowledgement timed out and a resync has been scheduled."
            }
            Self::Internal => {
                "An internal server error occurred. The room state was not changed."
            }
            Self::Expired => {
                "The room has expired. Create or join a new room to continue."
            }
        }
    }

    /// Whether failures carrying this code are recorded to the security log.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed | Self::Unauthorized | Self::RateLimited
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorCode; 9] = [
        ErrorCode::ValidationFailed,
        ErrorCode::Unauthorized,
        ErrorCode::NotFound,
        ErrorCode::RateLimited,
        ErrorCode::Conflict,
        ErrorCode::Duplicate,
        ErrorCode::Timeout,
        ErrorCode::Internal,
        ErrorCode::Expired,
    ];

    #[test]
    fn test_all_error_codes_have_descriptions() {
        for code in &ALL {
            let description = code.description();
            assert!(
                description.len() > 10,
                "ErrorCode::{:?} has suspiciously short description: '{}'",
                code,
                description
            );
        }
    }

    #[test]
    fn test_serialization_is_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ValidationFailed).unwrap(),
            "\"VALIDATION_FAILED\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::RateLimited).unwrap(),
            "\"RATE_LIMITED\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::NotFound).unwrap(),
            "\"NOT_FOUND\""
        );
    }

    #[test]
    fn test_security_relevance() {
        assert!(ErrorCode::ValidationFailed.is_security_relevant());
        assert!(ErrorCode::RateLimited.is_security_relevant());
        assert!(!ErrorCode::Duplicate.is_security_relevant());
        assert!(!ErrorCode::Timeout.is_security_relevant());
    }
}
