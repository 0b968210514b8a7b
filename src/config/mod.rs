//! Configuration module.
//!
//! Supports a JSON configuration file, environment variable overrides
//! for the recognized options, and sensible defaults throughout.

pub mod defaults;
pub mod loader;
pub mod logging;
pub mod protocol;
pub mod rate_limit;
pub mod room;
pub mod sync;
pub mod types;
pub mod validation;

pub use loader::load;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use protocol::ProtocolConfig;
pub use rate_limit::{RateLimitTier, RateLimitsConfig};
pub use room::RoomConfig;
pub use sync::SyncConfig;
pub use types::Config;
pub use validation::validate;
