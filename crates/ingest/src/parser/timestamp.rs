//! Timestamp handling shared by the text parsers, plus Windows FILETIME
//! conversion for the binary formats.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Offset between the Windows epoch (1601-01-01) and the Unix epoch
/// (1970-01-01), in 100 ns ticks.
const FILETIME_UNIX_DIFF: i64 = 116_444_736_000_000_000;

/// Accepted text timestamp layouts, tried in order.
const TEXT_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S", // ISO
    "%Y-%m-%d %H:%M:%S", // Standard
    "%m/%d/%Y %H:%M:%S", // US format
    "%Y%m%d%H%M%S",      // Compact
];

/// Parse a timestamp in one of the four accepted layouts.
///
/// Trailing content after the matched prefix (fractional seconds, a log
/// message) is ignored for all layouts except the compact one, which must
/// be exactly 14 digits.
pub fn parse_text_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    for format in &TEXT_FORMATS {
        if *format == "%Y%m%d%H%M%S" {
            if input.len() == 14 && input.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
                    return Some(dt.and_utc());
                }
            }
            continue;
        }

        // The prefix layouts are all 19 characters long.
        let prefix = match input.get(..19) {
            Some(p) => p,
            None => continue,
        };
        if let Ok(dt) = NaiveDateTime::parse_from_str(prefix, format) {
            return Some(dt.and_utc());
        }
    }

    None
}

/// Like [`parse_text_timestamp`], but an unrecognised layout yields "now"
/// instead of failing the line.
pub fn normalize_timestamp(input: &str) -> DateTime<Utc> {
    parse_text_timestamp(input).unwrap_or_else(Utc::now)
}

/// Extract the leading `YYYY-MM-DD HH:MM:SS` timestamp most provisioning
/// log lines start with. Returns `None` when the line has no such prefix.
pub fn leading_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let prefix = line.get(..19)?;
    NaiveDateTime::parse_from_str(prefix, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Convert a Windows FILETIME (100 ns ticks since 1601-01-01 UTC) to a
/// UTC instant, millisecond precision. Out-of-range values yield `None`.
pub fn filetime_to_utc(ticks: i64) -> Option<DateTime<Utc>> {
    let millis = (ticks - FILETIME_UNIX_DIFF) / 10_000;
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// Encode a UTC instant as a Windows FILETIME, millisecond precision.
pub fn utc_to_filetime(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis() * 10_000 + FILETIME_UNIX_DIFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_iso_timestamp() {
        let ts = parse_text_timestamp("2024-01-01T10:00:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_standard_timestamp() {
        let ts = parse_text_timestamp("2024-01-01 10:05:00 INFO: trailing text").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn test_parse_us_timestamp() {
        let ts = parse_text_timestamp("01/15/2024 08:30:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_compact_timestamp() {
        let ts = parse_text_timestamp("20240101100500").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn test_unrecognised_yields_now() {
        let before = Utc::now();
        let ts = normalize_timestamp("last tuesday-ish");
        assert!(ts >= before);
    }

    #[test]
    fn test_leading_timestamp_rejects_prose() {
        assert!(leading_timestamp("Installation successful").is_none());
        assert!(leading_timestamp("").is_none());
    }

    #[test]
    fn test_filetime_round_trip_millisecond_precision() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 15, 12, 34, 56).unwrap()
            + chrono::Duration::milliseconds(789);
        let ticks = utc_to_filetime(instant);
        let back = filetime_to_utc(ticks).unwrap();
        assert_eq!(back, instant);
    }

    #[test]
    fn test_filetime_unix_epoch() {
        let epoch = filetime_to_utc(FILETIME_UNIX_DIFF).unwrap();
        assert_eq!(epoch.timestamp_millis(), 0);
    }
}
