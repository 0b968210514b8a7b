//! Configuration validation: range checks for the recognized options.

use super::types::Config;
use std::fmt::Write as _;

/// Validate the merged configuration. Returns a multi-line report of
/// every violation, or Ok when the configuration is usable.
pub fn validate(config: &Config) -> Result<(), String> {
    let mut report = String::new();

    let room = &config.protocol.room;
    if !(4..=8).contains(&room.room_code_length) {
        let _ = writeln!(
            report,
            "room_code_length must be between 4 and 8 (got {})",
            room.room_code_length
        );
    }
    if !(1..=168).contains(&room.expiration_hours) {
        let _ = writeln!(
            report,
            "expiration_hours must be between 1 and 168 (got {})",
            room.expiration_hours
        );
    }
    if !(5..=100).contains(&room.max_players) {
        let _ = writeln!(
            report,
            "max_players must be between 5 and 100 (got {})",
            room.max_players
        );
    }

    let sync = &config.sync;
    if sync.snapshot_interval_versions == 0 {
        let _ = writeln!(report, "snapshot_interval_versions must be positive");
    }
    if sync.snapshot_max_per_room == 0 {
        let _ = writeln!(report, "snapshot_max_per_room must be positive");
    }
    if sync.replay_buffer_capacity == 0 {
        let _ = writeln!(report, "replay_buffer_capacity must be positive");
    }
    if sync.ack_timeout_ms == 0 {
        let _ = writeln!(report, "ack_timeout_ms must be positive");
    }
    if sync.sync_scan_hz == 0 || sync.sync_scan_hz > 60 {
        let _ = writeln!(
            report,
            "sync_scan_hz must be between 1 and 60 (got {})",
            sync.sync_scan_hz
        );
    }

    let check_tier = |report: &mut String, name: &str, tier: &super::rate_limit::RateLimitTier| {
        if tier.max_requests == 0 || tier.window_ms == 0 {
            let _ = writeln!(report, "rate limit tier '{name}' must have positive quota and window");
        }
        if let (Some(burst), Some(burst_window)) = (tier.burst_size, tier.burst_window_ms) {
            if burst < tier.max_requests || burst_window <= tier.window_ms {
                let _ = writeln!(
                    report,
                    "rate limit tier '{name}' burst must widen both ceiling and window"
                );
            }
        }
    };
    check_tier(&mut report, "default", &config.rate_limits.default);
    if let Some(tier) = &config.rate_limits.per_client {
        check_tier(&mut report, "per_client", tier);
    }
    if let Some(tier) = &config.rate_limits.per_room {
        check_tier(&mut report, "per_room", tier);
    }
    for (action, tier) in &config.rate_limits.per_action {
        check_tier(&mut report, action, tier);
    }

    if report.is_empty() {
        Ok(())
    } else {
        Err(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_out_of_range_room_options_reported() {
        let mut config = Config::default();
        config.protocol.room.room_code_length = 2;
        config.protocol.room.max_players = 500;
        let report = validate(&config).unwrap_err();
        assert!(report.contains("room_code_length"));
        assert!(report.contains("max_players"));
    }

    #[test]
    fn test_degenerate_burst_reported() {
        let mut config = Config::default();
        config.rate_limits.default.burst_size = Some(1);
        config.rate_limits.default.burst_window_ms = Some(1);
        let report = validate(&config).unwrap_err();
        assert!(report.contains("burst"));
    }

    #[test]
    fn test_zero_scan_hz_reported() {
        let mut config = Config::default();
        config.sync.sync_scan_hz = 0;
        assert!(validate(&config).is_err());
    }
}
