//! # Canonical Codec
//!
//! Wire payloads are canonical JSON. This module owns the one piece of
//! encoding logic that isn't "just derive `Serialize`": timestamp rendering
//! and tolerant parsing.
//!
//! Timestamps are emitted as ISO-8601 UTC with microsecond precision
//! (`YYYY-MM-DDTHH:MM:SS.ffffff`) and decoded tolerantly — a timestamp with
//! no fractional-second component must still parse, since peers running an
//! older or differently-configured codec may omit it.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Render a timestamp the way `to_dict` does in the original: ISO-8601 UTC,
/// microsecond precision.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
        .replace("+00:00", "")
}

/// Parse a timestamp, tolerating the presence or absence of the
/// fractional-second component (mirrors `kvobject.py`'s `from_dict`, which
/// tries `%Y-%m-%dT%H:%M:%S.%f` then falls back to `%Y-%m-%dT%H:%M:%S`).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    const WITH_FRACTION: &str = "%Y-%m-%dT%H:%M:%S%.f";
    const WITHOUT_FRACTION: &str = "%Y-%m-%dT%H:%M:%S";

    match NaiveDateTime::parse_from_str(raw, WITH_FRACTION) {
        Ok(naive) => Ok(DateTime::from_naive_utc_and_offset(naive, Utc)),
        Err(with_fraction_err) => {
            match NaiveDateTime::parse_from_str(raw, WITHOUT_FRACTION) {
                Ok(naive) => Ok(DateTime::from_naive_utc_and_offset(naive, Utc)),
                Err(_) => Err(with_fraction_err),
            }
        }
    }
}

/// Structural field names that may never appear as an attribute key.
pub const STRUCTURAL_FIELDS: &[&str] = &[
    "object_id",
    "origin_id",
    "updated_at",
    "collection",
    "ttl",
    "_lock",
    "_ttl",
    "_pending_events",
    "_inbound_event_queue",
];

pub fn is_structural_field(key: &str) -> bool {
    STRUCTURAL_FIELDS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_microsecond_precision() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap()
            + chrono::Duration::microseconds(123456);
        let s = format_timestamp(ts);
        assert_eq!(s, "2024-03-01T12:30:45.123456");
    }

    #[test]
    fn parses_with_and_without_fraction() {
        let with_fraction = parse_timestamp("2024-03-01T12:30:45.123456").unwrap();
        let without_fraction = parse_timestamp("2024-03-01T12:30:45").unwrap();
        assert_eq!(with_fraction.timestamp(), without_fraction.timestamp());
        assert_eq!(with_fraction.timestamp_subsec_micros(), 123456);
        assert_eq!(without_fraction.timestamp_subsec_micros(), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("not-a-timestamp").is_err());
    }

    #[test]
    fn structural_fields_are_rejected_as_attrs() {
        assert!(is_structural_field("object_id"));
        assert!(!is_structural_field("a"));
    }
}
