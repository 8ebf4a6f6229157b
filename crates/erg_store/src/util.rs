use chrono::{DateTime, SecondsFormat, Utc};

/// Timestamps are stored as fixed-width RFC 3339 UTC strings (nanosecond
/// precision, `Z` suffix) so that lexicographic comparison in SQL matches
/// chronological order.
pub fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_time(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

/// The hostname stamped onto blocks at write time, if the OS will tell us.
pub fn process_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_round_trip_is_lexicographic() {
        let a: DateTime<Utc> = "2024-05-01T12:00:00Z".parse().unwrap();
        let b: DateTime<Utc> = "2024-05-01T12:00:00.5Z".parse().unwrap();
        let c: DateTime<Utc> = "2024-05-01T12:00:01Z".parse().unwrap();

        let (fa, fb, fc) = (format_time(a), format_time(b), format_time(c));
        assert!(fa < fb && fb < fc);

        assert_eq!(parse_time(&fb).unwrap(), b);
    }
}
