use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Format used by the condenser API for every timestamp (UTC, no zone suffix).
pub const CHAIN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parses a condenser style timestamp (`2024-01-31T12:00:00`).
///
/// A trailing `Z` is tolerated since some nodes append it.
pub fn parse_chain_time(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, CHAIN_TIME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Formats a timestamp the way the chain expects it in transactions.
pub fn format_chain_time(value: &DateTime<Utc>) -> String {
    value.format(CHAIN_TIME_FORMAT).to_string()
}

/// Converts unix seconds into a UTC timestamp, clamping garbage to the epoch.
pub fn from_unix_seconds(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Divides by one million, rounding half away from zero.
pub fn mill(input: i64) -> i64 {
    (input as f64 / 1e6).round() as i64
}

/// Renders an integer with `,` thousands separators.
pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0 {
        out.insert(0, '-');
    }
    out
}
