use chrono::offset::LocalResult;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Graph reports Windows zone names unless asked otherwise. Only the
/// common ones are mapped; the rest fall back to UTC.
const WINDOWS_ZONES: &[(&str, &str)] = &[
    ("UTC", "UTC"),
    ("GMT Standard Time", "Europe/London"),
    ("Greenwich Standard Time", "Atlantic/Reykjavik"),
    ("W. Europe Standard Time", "Europe/Berlin"),
    ("Romance Standard Time", "Europe/Paris"),
    ("Central Europe Standard Time", "Europe/Budapest"),
    ("Central European Standard Time", "Europe/Warsaw"),
    ("E. Europe Standard Time", "Europe/Chisinau"),
    ("FLE Standard Time", "Europe/Kiev"),
    ("GTB Standard Time", "Europe/Bucharest"),
    ("Russian Standard Time", "Europe/Moscow"),
    ("Eastern Standard Time", "America/New_York"),
    ("Central Standard Time", "America/Chicago"),
    ("Mountain Standard Time", "America/Denver"),
    ("US Mountain Standard Time", "America/Phoenix"),
    ("Pacific Standard Time", "America/Los_Angeles"),
    ("Alaskan Standard Time", "America/Anchorage"),
    ("Hawaiian Standard Time", "Pacific/Honolulu"),
    ("Atlantic Standard Time", "America/Halifax"),
    ("E. South America Standard Time", "America/Sao_Paulo"),
    ("India Standard Time", "Asia/Kolkata"),
    ("China Standard Time", "Asia/Shanghai"),
    ("Tokyo Standard Time", "Asia/Tokyo"),
    ("Singapore Standard Time", "Asia/Singapore"),
    ("AUS Eastern Standard Time", "Australia/Sydney"),
    ("New Zealand Standard Time", "Pacific/Auckland"),
];

/// Resolves an IANA name directly, then through the Windows table.
pub fn resolve_zone(name: &str) -> Option<Tz> {
    if let Ok(zone) = name.parse::<Tz>() {
        return Some(zone);
    }

    WINDOWS_ZONES
        .iter()
        .find(|(windows, _)| windows.eq_ignore_ascii_case(name))
        .and_then(|(_, iana)| iana.parse::<Tz>().ok())
}

pub fn parse_rfc3339_to_utc(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|value| value.with_timezone(&Utc))
}

/// Parses a date-time that may carry an offset, or a naive wall-clock
/// value to be read in `zone`.
pub fn parse_zoned_datetime(raw: &str, zone: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(parsed) = parse_rfc3339_to_utc(raw) {
        return Some(parsed);
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;

    if let Some(zone) = zone.and_then(resolve_zone) {
        return match zone.from_local_datetime(&naive) {
            LocalResult::Single(datetime) => Some(datetime.with_timezone(&Utc)),
            LocalResult::Ambiguous(first, _) => Some(first.with_timezone(&Utc)),
            LocalResult::None => Some(Utc.from_utc_datetime(&naive)),
        };
    }

    Some(Utc.from_utc_datetime(&naive))
}

/// Date part of `2024-05-14` or `2024-05-14T00:00:00.0000000`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_zone_names_resolve() {
        let parsed = parse_zoned_datetime("2024-01-15T09:00:00.0000000", Some("Pacific Standard Time"))
            .expect("parse");
        assert_eq!(parsed.to_rfc3339(), "2024-01-15T17:00:00+00:00");
    }

    #[test]
    fn iana_and_offset_values_parse() {
        let zoned = parse_zoned_datetime("2024-07-01T09:00:00", Some("Europe/Berlin")).expect("zoned");
        assert_eq!(zoned.to_rfc3339(), "2024-07-01T07:00:00+00:00");

        let offset = parse_zoned_datetime("2024-07-01T09:00:00+02:00", Some("ignored")).expect("offset");
        assert_eq!(offset, zoned);
    }

    #[test]
    fn unknown_zone_is_read_as_utc() {
        let parsed = parse_zoned_datetime("2024-07-01T09:00:00", Some("Mars Standard Time")).expect("parse");
        assert_eq!(parsed.to_rfc3339(), "2024-07-01T09:00:00+00:00");
    }

    #[test]
    fn dates_are_cut_from_datetimes() {
        assert_eq!(
            parse_date("2024-05-14T00:00:00.0000000"),
            NaiveDate::from_ymd_opt(2024, 5, 14)
        );
        assert_eq!(parse_date("bad"), None);
    }
}
