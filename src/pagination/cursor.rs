//! Opaque position tokens for keyset pagination.
//!
//! A cursor is the little-endian bytes of an `i32` key, base64url-encoded
//! without padding. The codec knows nothing about pagination direction.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Returned when a string is not a well-formed cursor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cursor")]
pub struct InvalidCursor;

/// Encode a key into a URL-safe cursor.
pub fn encode(key: i32) -> String {
    URL_SAFE_NO_PAD.encode(key.to_le_bytes())
}

/// Decode a cursor back into its key.
///
/// Anything other than the canonical six-character encoding of four bytes is
/// rejected, so every key has exactly one valid cursor.
pub fn decode(cursor: &str) -> Result<i32, InvalidCursor> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| InvalidCursor)?;
    let bytes: [u8; 4] = bytes.try_into().map_err(|_| InvalidCursor)?;
    Ok(i32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_boundaries() {
        for key in [0, 1, -1, 2, 255, 256, 65_536, i32::MAX, i32::MIN] {
            assert_eq!(decode(&encode(key)), Ok(key), "key {}", key);
        }
    }

    #[test]
    fn test_round_trip_sampled_range() {
        let mut key = i32::MIN;
        loop {
            assert_eq!(decode(&encode(key)), Ok(key));
            match key.checked_add(16_777_259) {
                Some(next) => key = next,
                None => break,
            }
        }
    }

    #[test]
    fn test_encoding_is_url_safe() {
        for key in [-1, i32::MAX, i32::MIN, 0x3f3f_3f3f, -0x0404_0404] {
            let cursor = encode(key);
            assert_eq!(cursor.len(), 6);
            assert!(
                cursor
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "{} is not url safe",
                cursor
            );
        }
    }

    #[test]
    fn test_distinct_keys_have_distinct_cursors() {
        assert_ne!(encode(1), encode(256));
        assert_ne!(encode(-1), encode(i32::MAX));
    }

    #[test]
    fn test_garbage_rejected() {
        for garbage in ["", "A", "AAAA", "AAAAAAAA", "not a cursor", "AQAAAA==", "AQ+/AA", "!!!!!!"] {
            assert_eq!(decode(garbage), Err(InvalidCursor), "{:?}", garbage);
        }
    }

    #[test]
    fn test_non_canonical_trailing_bits_rejected() {
        // "AQAAAA" is 1; flipping the unused low bits of the final symbol must not alias it.
        assert_eq!(decode("AQAAAA"), Ok(1));
        assert_eq!(decode("AQAAAB"), Err(InvalidCursor));
        assert_eq!(decode("AQAAAP"), Err(InvalidCursor));
    }

    #[test]
    fn test_wrong_length_payload_rejected() {
        let three_bytes = URL_SAFE_NO_PAD.encode([1u8, 2, 3]);
        let five_bytes = URL_SAFE_NO_PAD.encode([1u8, 2, 3, 4, 5]);
        assert_eq!(decode(&three_bytes), Err(InvalidCursor));
        assert_eq!(decode(&five_bytes), Err(InvalidCursor));
    }
}
