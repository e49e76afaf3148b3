//! TTL duration literals
//!
//! Durations cross two boundaries as text: command input (`SET k v 5m`) and
//! WAL records (`EXPIRE k 1h30m`). Parsing is humantime's grammar. The
//! formatter is local because WAL fields are whitespace-separated single
//! tokens, and humantime's formatter puts spaces between units.

use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Parse a duration literal such as `250ms`, `5m`, or `1h30m`.
pub fn parse_ttl(input: &str) -> StoreResult<Duration> {
    humantime::parse_duration(input).map_err(|source| StoreError::BadDuration {
        input: input.to_string(),
        source,
    })
}

/// Render a duration as a compact single-token literal.
///
/// Largest unit is hours; components are concatenated without separators
/// (`1h30m`, `2m5s`, `250ms`). The output round-trips through [`parse_ttl`].
pub fn format_ttl(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let secs = d.as_secs();
    let nanos = d.subsec_nanos();

    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    let millis = nanos / 1_000_000;
    let micros = (nanos / 1_000) % 1_000;
    let nanos = nanos % 1_000;

    let mut out = String::new();
    for (amount, unit) in [
        (hours, "h"),
        (mins, "m"),
        (secs as u64, "s"),
        (millis as u64, "ms"),
        (micros as u64, "us"),
        (nanos as u64, "ns"),
    ] {
        if amount > 0 {
            out.push_str(&amount.to_string());
            out.push_str(unit);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_ttl("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_ttl("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_ttl("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_ttl("10us").unwrap(), Duration::from_micros(10));
    }

    #[test]
    fn parses_compound_literals() {
        assert_eq!(parse_ttl("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_ttl("2m5s").unwrap(), Duration::from_secs(125));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_ttl("soon"),
            Err(StoreError::BadDuration { .. })
        ));
        assert!(matches!(parse_ttl(""), Err(StoreError::BadDuration { .. })));
    }

    #[test]
    fn formats_compact_tokens() {
        assert_eq!(format_ttl(Duration::from_millis(250)), "250ms");
        assert_eq!(format_ttl(Duration::from_secs(300)), "5m");
        assert_eq!(format_ttl(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_ttl(Duration::from_secs(3661)), "1h1m1s");
        assert_eq!(format_ttl(Duration::ZERO), "0s");
    }

    #[test]
    fn format_never_contains_whitespace() {
        for d in [
            Duration::from_nanos(1),
            Duration::from_micros(1_001),
            Duration::from_millis(90_250),
            Duration::from_secs(7325),
        ] {
            let text = format_ttl(d);
            assert!(!text.contains(char::is_whitespace), "{text:?}");
        }
    }

    #[test]
    fn format_round_trips() {
        for d in [
            Duration::from_millis(250),
            Duration::from_secs(90),
            Duration::from_secs(5400),
            Duration::new(125, 250_000_000),
        ] {
            assert_eq!(parse_ttl(&format_ttl(d)).unwrap(), d);
        }
    }
}
