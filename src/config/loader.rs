//! Configuration loading: `config.json` if present, then environment
//! variable overrides for the recognized options.

use super::types::Config;
use std::path::Path;

/// Load configuration from `config.json` in the working directory (or
/// the path named by `PARLOR_CONFIG`), apply environment overrides, and
/// validate. Invalid files fall back to defaults with a logged error.
pub fn load() -> Config {
    let path = std::env::var("PARLOR_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let mut config = load_from_path(Path::new(&path));
    apply_env_overrides(&mut config);

    if let Err(report) = super::validation::validate(&config) {
        // Startup continues; the binary's --validate-config path turns
        // this into a hard failure.
        eprintln!("Configuration validation reported problems:\n{report}");
    }

    config
}

fn load_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "loaded configuration file");
                config
            }
            Err(error) => {
                eprintln!(
                    "Failed to parse {}: {error}; using defaults",
                    path.display()
                );
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

/// Apply environment overrides. Unparseable values are ignored with a
/// warning rather than aborting startup.
pub fn apply_env_overrides(config: &mut Config) {
    override_parse(&mut config.port, "PORT");
    override_parse(
        &mut config.protocol.room.room_code_length,
        "ROOM_CODE_LENGTH",
    );
    override_parse(
        &mut config.protocol.room.expiration_hours,
        "ROOM_EXPIRATION_HOURS",
    );
    override_parse(&mut config.protocol.room.max_players, "MAX_PLAYERS");
    override_parse(
        &mut config.sync.snapshot_interval_versions,
        "SNAPSHOT_INTERVAL_VERSIONS",
    );
    override_parse(
        &mut config.sync.snapshot_max_per_room,
        "SNAPSHOT_MAX_PER_ROOM",
    );
    override_parse(
        &mut config.sync.replay_buffer_capacity,
        "REPLAY_BUFFER_CAPACITY",
    );
    override_parse(&mut config.sync.replay_event_ttl_ms, "REPLAY_EVENT_TTL_MS");
    override_parse(&mut config.sync.dedup_ttl_ms, "DEDUP_TTL_MS");
    override_parse(&mut config.sync.ack_timeout_ms, "ACK_TIMEOUT_MS");
    override_parse(&mut config.sync.sync_scan_hz, "SYNC_SCAN_HZ");
    override_parse(
        &mut config.sync.min_full_broadcast_gap_ms,
        "MIN_FULL_BROADCAST_GAP_MS",
    );

    if let Ok(url) = std::env::var("REDIS_URL") {
        if !url.trim().is_empty() {
            config.redis_url = Some(url);
        }
    }
    if let Ok(origins) = std::env::var("CORS_ORIGINS") {
        if !origins.trim().is_empty() {
            config.cors_origins = origins;
        }
    }
}

fn override_parse<T: std::str::FromStr>(slot: &mut T, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => eprintln!("Ignoring unparseable {var}={raw}"),
        }
    }
}
