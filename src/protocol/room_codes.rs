use crate::config::RoomConfig;
use rand::RngExt;

/// Alphabet for room codes, excluding easily confused glyphs (0, O, I, 1).
const CLEAN_CHARS: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Generate a room code of the configured length from the clean alphabet.
pub fn generate_room_code(config: &RoomConfig) -> String {
    generate_room_code_of_length(config.room_code_length)
}

/// Generate a clean room code of the requested length.
pub fn generate_room_code_of_length(length: usize) -> String {
    if length == 0 {
        return String::new();
    }
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CLEAN_CHARS.len());
            // SAFETY: `idx` is produced by `random_range(0..len)`, so it is
            // always within [0, len).
            #[allow(clippy::indexing_slicing)]
            let ch = CLEAN_CHARS[idx] as char;
            ch
        })
        .collect()
}

/// Check that a candidate code uses only the clean alphabet and has an
/// acceptable length.
pub fn is_valid_room_code(code: &str, config: &RoomConfig) -> bool {
    code.len() == config.room_code_length
        && code.bytes().all(|b| CLEAN_CHARS.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_has_configured_length() {
        let config = RoomConfig {
            room_code_length: 4,
            ..Default::default()
        };
        let code = generate_room_code(&config);
        assert_eq!(code.len(), 4);
    }

    #[test]
    fn test_generated_code_avoids_confusable_characters() {
        for _ in 0..200 {
            let code = generate_room_code_of_length(8);
            for ch in code.chars() {
                assert!(
                    !"0OI1".contains(ch),
                    "code '{}' contains confusable character '{}'",
                    code,
                    ch
                );
            }
        }
    }

    #[test]
    fn test_zero_length_yields_empty_code() {
        assert_eq!(generate_room_code_of_length(0), "");
    }

    #[test]
    fn test_validation_rejects_wrong_length_and_alphabet() {
        let config = RoomConfig {
            room_code_length: 4,
            ..Default::default()
        };
        assert!(is_valid_room_code("WXYZ", &config));
        assert!(!is_valid_room_code("WXY", &config));
        assert!(!is_valid_room_code("WXY0", &config)); // contains 0
        assert!(!is_valid_room_code("wxyz", &config)); // lowercase
    }

    #[test]
    fn test_generated_codes_are_valid() {
        let config = RoomConfig {
            room_code_length: 6,
            ..Default::default()
        };
        for _ in 0..50 {
            let code = generate_room_code(&config);
            assert!(is_valid_room_code(&code, &config), "generated invalid code {code}");
        }
    }
}
