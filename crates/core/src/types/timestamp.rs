//! Millisecond epoch timestamps.
//!
//! Normalized payloads carry wall-clock time as `u64` milliseconds since the
//! Unix epoch. Exchanges report time in seconds, milliseconds or
//! microseconds; the helpers here convert without going through `f64`.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Lower bound for a plausible millisecond timestamp (2018-07-15T17:58:00Z).
///
/// Any value at or below this is almost certainly a seconds value mislabeled
/// as milliseconds.
pub const MIN_PLAUSIBLE_MS: u64 = 1_531_677_480_000;

/// Current wall-clock time in milliseconds since the epoch.
#[inline]
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Returns `true` if `ms` looks like a millisecond epoch timestamp.
#[inline]
pub const fn is_plausible_millis(ms: u64) -> bool {
    ms > MIN_PLAUSIBLE_MS
}

/// Convert microseconds since the epoch to milliseconds (truncating).
#[inline]
pub const fn micros_to_millis(us: u64) -> u64 {
    us / 1_000
}

/// Convert a decimal seconds string (`"1535098000"`, `"1535098000.123456"`)
/// into integer milliseconds, truncating sub-millisecond digits.
///
/// Returns `None` for unparseable or negative input.
pub fn seconds_to_millis(secs: &str) -> Option<u64> {
    let secs = Decimal::from_str(secs.trim()).ok()?;
    (secs * Decimal::from(1_000)).trunc().to_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_plausible() {
        assert!(is_plausible_millis(now_millis()));
    }

    #[test]
    fn test_seconds_are_not_plausible_millis() {
        // A seconds-precision timestamp must fail the sanity floor.
        assert!(!is_plausible_millis(1_706_000_000));
        assert!(!is_plausible_millis(MIN_PLAUSIBLE_MS));
        assert!(is_plausible_millis(1_706_000_000_000));
    }

    #[test]
    fn test_micros_to_millis() {
        assert_eq!(micros_to_millis(1_706_000_000_123_456), 1_706_000_000_123);
    }

    #[test]
    fn test_seconds_to_millis_integer() {
        assert_eq!(seconds_to_millis("1706000000"), Some(1_706_000_000_000));
    }

    #[test]
    fn test_seconds_to_millis_fractional() {
        assert_eq!(
            seconds_to_millis("1535098000.123456"),
            Some(1_535_098_000_123)
        );
    }

    #[test]
    fn test_seconds_to_millis_rejects_garbage() {
        assert_eq!(seconds_to_millis("abc"), None);
        assert_eq!(seconds_to_millis("-5"), None);
    }
}
