use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, Utc};

/// Fixed-width UTC form used in the database, so text order is time order.
pub fn format_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Drops the sub-millisecond part that [`format_db_time`] cannot keep.
pub fn to_db_precision(time: DateTime<Utc>) -> DateTime<Utc> {
    time.trunc_subsecs(3)
}

/// Reads back a value written by [`format_db_time`].
pub fn parse_db_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

/// Parses a user-supplied ISO-8601 time.
///
/// Offsets are honoured; times without one (as sent by a browser
/// `datetime-local` input) are taken as UTC.
pub fn parse_iso8601(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(input) {
        return Some(time.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_db_time_is_fixed_width_and_sortable() {
        let early = Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 11, 20, 18, 30, 5).unwrap();

        let early_text = format_db_time(&early);
        let late_text = format_db_time(&late);

        assert_eq!(early_text, "2024-01-05T09:00:00.000Z");
        assert_eq!(early_text.len(), late_text.len());
        assert!(early_text < late_text);
        assert_eq!(parse_db_time(&late_text), Some(late));
    }

    #[test]
    fn test_parse_iso8601_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        assert_eq!(parse_iso8601("2024-03-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_iso8601("2024-03-01T14:00:00+02:00"), Some(expected));
        assert_eq!(parse_iso8601("2024-03-01T12:00"), Some(expected));
        assert_eq!(parse_iso8601("2024-03-01 12:00:00"), Some(expected));
        assert_eq!(parse_iso8601("yesterday"), None);
        assert_eq!(parse_iso8601(""), None);
    }
}
