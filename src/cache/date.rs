//! HTTP-date parsing and formatting (RFC 9110 §5.6.7).
//!
//! All three historical formats are accepted on input; output is always
//! IMF-fixdate. Validators are compared at second granularity, so parsed
//! values never carry sub-second precision.

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC_850: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

/// Parses an HTTP-date, returning `None` for anything malformed.
///
/// Trailing parameters after `;` (e.g. the legacy `; length=1234` some
/// browsers append to `If-Modified-Since`) are ignored.
///
/// # Examples
///
/// ```
/// use vcache::cache::date::{format_http_date, parse_http_date};
///
/// let ts = parse_http_date("Mon, 01 Jan 2024 00:00:00 GMT").unwrap();
/// assert_eq!(format_http_date(ts), "Mon, 01 Jan 2024 00:00:00 GMT");
/// assert!(parse_http_date("yesterday").is_none());
/// ```
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.split(';').next()?.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(value, IMF_FIXDATE) {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, RFC_850) {
        return Some(Utc.from_utc_datetime(&dt));
    }
    NaiveDateTime::parse_from_str(value, ASCTIME)
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

/// Formats a timestamp as an IMF-fixdate string.
pub fn format_http_date(ts: DateTime<Utc>) -> String {
    ts.format(IMF_FIXDATE).to_string()
}

/// Drops sub-second precision.
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}
