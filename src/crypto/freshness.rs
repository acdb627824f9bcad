//! Request timestamp window enforcement.

use crate::clock::Clock;

/// Outcome of a timestamp window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within tolerance.
    Fresh,
    /// Older than tolerance allows.
    Stale {
        /// Seconds between the timestamp and now.
        age_seconds: i64,
    },
    /// Further in the future than tolerance allows.
    FromFuture {
        /// Seconds the timestamp is ahead of now.
        ahead_seconds: i64,
    },
    /// Not a decimal unix-seconds integer.
    Unparsable,
}

impl Freshness {
    /// Whether the timestamp is acceptable.
    pub fn is_fresh(self) -> bool {
        matches!(self, Freshness::Fresh)
    }
}

/// Parse a decimal unix-seconds timestamp.
///
/// Only ASCII digits are accepted; signs, whitespace and fractions are not.
pub fn parse_unix_timestamp(value: &str) -> Option<i64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<i64>().ok()
}

/// Check that `|now - timestamp| <= tolerance`.
pub fn check_timestamp<C: Clock + ?Sized>(
    timestamp: &str,
    tolerance_seconds: u64,
    clock: &C,
) -> Freshness {
    let Some(ts) = parse_unix_timestamp(timestamp) else {
        return Freshness::Unparsable;
    };

    let tolerance = i64::try_from(tolerance_seconds).unwrap_or(i64::MAX);
    let skew = clock.unix_seconds().saturating_sub(ts);

    if skew > tolerance {
        Freshness::Stale { age_seconds: skew }
    } else if skew < -tolerance {
        Freshness::FromFuture {
            ahead_seconds: -skew,
        }
    } else {
        Freshness::Fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    const NOW: i64 = 1_704_067_200;

    #[test]
    fn test_parse_valid() {
        assert_eq!(parse_unix_timestamp("1704067200"), Some(NOW));
    }

    #[test]
    fn test_parse_rejects_non_digits() {
        assert_eq!(parse_unix_timestamp(""), None);
        assert_eq!(parse_unix_timestamp("-5"), None);
        assert_eq!(parse_unix_timestamp("12.5"), None);
        assert_eq!(parse_unix_timestamp(" 12"), None);
        assert_eq!(parse_unix_timestamp("abc"), None);
        assert_eq!(parse_unix_timestamp("99999999999999999999999"), None);
    }

    #[test]
    fn test_exactly_at_tolerance_passes() {
        let clock = MockClock::at_unix(NOW);
        let ts = (NOW - 300).to_string();
        assert_eq!(check_timestamp(&ts, 300, &clock), Freshness::Fresh);
    }

    #[test]
    fn test_one_past_tolerance_fails() {
        let clock = MockClock::at_unix(NOW);
        let ts = (NOW - 301).to_string();
        assert_eq!(
            check_timestamp(&ts, 300, &clock),
            Freshness::Stale { age_seconds: 301 }
        );
    }

    #[test]
    fn test_future_window() {
        let clock = MockClock::at_unix(NOW);
        assert!(check_timestamp(&(NOW + 300).to_string(), 300, &clock).is_fresh());
        assert_eq!(
            check_timestamp(&(NOW + 301).to_string(), 300, &clock),
            Freshness::FromFuture { ahead_seconds: 301 }
        );
    }

    #[test]
    fn test_unparsable() {
        let clock = MockClock::at_unix(NOW);
        assert_eq!(check_timestamp("yesterday", 300, &clock), Freshness::Unparsable);
    }
}
