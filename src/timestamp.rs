//! Timestamp parsing and formatting.
//!
//! Vendors disagree on time encodings: GPT uses Unix-epoch float seconds,
//! the rest use RFC3339 with varying fractional precision. Everything is
//! normalized to `DateTime<Utc>` and stored as RFC3339 text with
//! millisecond precision so SQLite `DATE()` and string range filters work.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Convert Unix-epoch float seconds. Non-finite or out-of-range values
/// yield `None`.
pub fn from_unix_float(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

/// Parse RFC3339 at any fractional precision (seconds through nanoseconds).
pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Storage encoding used for every timestamp column.
pub fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Compact display form for CLI output.
pub fn to_display(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Earliest and latest of a set of instants.
pub fn bounds<I>(instants: I) -> Option<(DateTime<Utc>, DateTime<Utc>)>
where
    I: IntoIterator<Item = DateTime<Utc>>,
{
    instants.into_iter().fold(None, |acc, ts| match acc {
        None => Some((ts, ts)),
        Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_float_keeps_fraction() {
        let ts = from_unix_float(1_700_000_000.25).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_millis(), 250);
        assert!(from_unix_float(f64::NAN).is_none());
    }

    #[test]
    fn rfc3339_variants() {
        let secs = parse_rfc3339("2025-03-01T10:00:00Z").unwrap();
        let nanos = parse_rfc3339("2025-03-01T10:00:00.123456789Z").unwrap();
        let millis = parse_rfc3339("2025-10-03T12:39:28.166Z").unwrap();
        let offset = parse_rfc3339("2025-03-01T12:00:00+02:00").unwrap();
        assert_eq!(secs, offset);
        assert!(nanos > secs);
        assert_eq!(millis.timestamp_subsec_millis(), 166);
        assert!(parse_rfc3339("yesterday").is_none());
        assert!(parse_rfc3339("").is_none());
    }

    #[test]
    fn storage_format_is_sortable() {
        let ts = parse_rfc3339("2025-03-01T10:00:00.5Z").unwrap();
        assert_eq!(to_storage(&ts), "2025-03-01T10:00:00.500Z");
    }

    #[test]
    fn bounds_of_instants() {
        let a = parse_rfc3339("2025-03-01T10:00:00Z").unwrap();
        let b = parse_rfc3339("2025-03-02T10:00:00Z").unwrap();
        assert_eq!(bounds(vec![b, a]), Some((a, b)));
        assert_eq!(bounds(Vec::new()), None);
    }
}
