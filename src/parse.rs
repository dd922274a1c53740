//! Decoder for MIRAS notification payloads.
//!
//! Pure functions only: no I/O and no shared state, so they can be called from
//! the ingestion task or from tests without a runtime.
//!
//! | Input | Result |
//! |---|---|
//! | `b"1,2,...,12"` | `Some(Sample { values: [1.0, 2.0, ..., 12.0] })` |
//! | `b"1,x,3"` | `Some(Sample { values: [1.0, NaN, 3.0] })` |
//! | `b""` | `None` (dropped, not an error) |
//!
//! Malformed fields are tolerated rather than rejected. Consumers of
//! [`Sample`] must cope with NaN channels and with channel counts other than
//! [`crate::protocol::CHANNEL_COUNT`].

use crate::protocol::FIELD_DELIMITER;
use crate::types::Sample;

/// Decode one notification into a [`Sample`] stamped with `elapsed_ms`.
///
/// `elapsed_ms` is the time since the link was established, measured by the
/// caller when the notification arrived.
///
/// Returns `None` when the transport delivered an empty buffer. Every other
/// payload yields a sample, however malformed: a leading byte-order mark is
/// skipped, invalid UTF-8 is replaced lossily and unparsable fields become
/// `f64::NAN`.
pub fn decode(payload: &[u8], elapsed_ms: u64) -> Option<Sample> {
    if payload.is_empty() {
        return None;
    }
    let raw = String::from_utf8_lossy(payload);
    let text = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
    let values = text.split(FIELD_DELIMITER).map(parse_channel).collect();
    Some(Sample::new(elapsed_ms, values))
}

/// Parse one field as a base-10 integer with lenient prefix matching.
///
/// Leading whitespace (including U+FEFF) is skipped, an optional `+`/`-` sign is accepted, and
/// the longest run of ASCII digits that follows is the value. Anything after
/// the digits is ignored (`"12\r\n"` → `12.0`, `"7abc"` → `7.0`). A field with
/// no digits is `NaN`.
pub fn parse_channel(field: &str) -> f64 {
    let s = field.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let digits_end = rest
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return f64::NAN;
    }

    // A pure digit run always parses as f64; very long runs saturate to
    // large magnitudes instead of overflowing.
    let magnitude: f64 = rest[..digits_end].parse().unwrap_or(f64::NAN);
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_twelve_channel_reading() {
        let sample = decode(b"1,2,3,4,5,6,7,8,9,10,11,12", 500).unwrap();
        assert_eq!(sample.timestamp, 500);
        let expected: Vec<f64> = (1..=12).map(f64::from).collect();
        assert_eq!(sample.values, expected);
        assert!(sample.is_well_formed());
    }

    #[test]
    fn empty_payload_is_dropped() {
        assert!(decode(b"", 10).is_none());
    }

    #[test]
    fn malformed_fields_become_nan() {
        let sample = decode(b"1,abc,,3", 0).unwrap();
        assert_eq!(sample.values.len(), 4);
        assert_eq!(sample.values[0], 1.0);
        assert!(sample.values[1].is_nan());
        assert!(sample.values[2].is_nan());
        assert_eq!(sample.values[3], 3.0);
    }

    #[test]
    fn channel_count_is_not_enforced() {
        assert_eq!(decode(b"5", 0).unwrap().values, vec![5.0]);
        let long = decode(b"1,2,3,4,5,6,7,8,9,10,11,12,13,14", 0).unwrap();
        assert_eq!(long.values.len(), 14);
    }

    #[test]
    fn trailing_line_ending_is_ignored() {
        let sample = decode(b"10,20,30\r\n", 0).unwrap();
        assert_eq!(sample.values, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let sample = decode(&[b'4', b',', 0xff, b',', b'6'], 0).unwrap();
        assert_eq!(sample.values[0], 4.0);
        assert!(sample.values[1].is_nan());
        assert_eq!(sample.values[2], 6.0);
    }

    #[test]
    fn leading_byte_order_mark_is_skipped() {
        let sample = decode(b"\xEF\xBB\xBF1,2", 0).unwrap();
        assert_eq!(sample.values, vec![1.0, 2.0]);

        let sample = decode(b"1,\xEF\xBB\xBF2", 0).unwrap();
        assert_eq!(sample.values, vec![1.0, 2.0]);
        assert!(parse_channel("\u{feff}").is_nan());
    }

    #[test]
    fn parse_channel_prefix_semantics() {
        assert_eq!(parse_channel("42"), 42.0);
        assert_eq!(parse_channel("  7"), 7.0);
        assert_eq!(parse_channel("-15"), -15.0);
        assert_eq!(parse_channel("+3"), 3.0);
        assert_eq!(parse_channel("12abc"), 12.0);
        assert_eq!(parse_channel("3.9"), 3.0);
        assert!(parse_channel("").is_nan());
        assert!(parse_channel("-").is_nan());
        assert!(parse_channel("x1").is_nan());
        assert!(parse_channel(" - 4").is_nan());
    }
}
