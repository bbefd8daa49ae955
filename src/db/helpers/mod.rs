use std::convert::TryFrom;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDateTime};

/// Storage format for every timestamp the crate writes. `%.f` prints nothing
/// for whole seconds and keeps any sub-second part, so distinct instants
/// never share a stored key.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const ACCEPTED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a stored wall-clock timestamp. Besides the canonical format this
/// accepts the `T` separator, fractional seconds and RFC 3339 strings (the
/// offset is dropped, the local wall-clock part is kept).
pub fn parse_timestamp(value: &str, field: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    for format in ACCEPTED_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.naive_local());
    }
    bail!("failed to parse {field} from {value:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn parses_driver_representations() {
        let expected = at(8, 10, 0);
        for raw in [
            "2024-03-01 08:10:00",
            "2024-03-01T08:10:00",
            "  2024-03-01 08:10:00 ",
            "2024-03-01 08:10",
            "2024-03-01T08:10:00+02:00",
        ] {
            assert_eq!(parse_timestamp(raw, "observed_at").unwrap(), expected, "{raw}");
        }
        assert_eq!(
            parse_timestamp("2024-03-01 08:10:00.250", "observed_at").unwrap(),
            expected + chrono::Duration::milliseconds(250)
        );
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_timestamp("yesterday-ish", "observed_at").unwrap_err();
        assert!(err.to_string().contains("observed_at"));
        assert!(parse_timestamp("", "observed_at").is_err());
        assert!(parse_timestamp("2024-13-01 08:10:00", "observed_at").is_err());
    }

    #[test]
    fn format_round_trips_through_parse() {
        let value = at(23, 59, 59);
        assert_eq!(format_timestamp(&value), "2024-03-01 23:59:59");
        assert_eq!(parse_timestamp(&format_timestamp(&value), "t").unwrap(), value);
    }

    #[test]
    fn format_keeps_sub_second_part() {
        let early = at(8, 10, 0) + chrono::Duration::milliseconds(250);
        let late = at(8, 10, 0) + chrono::Duration::milliseconds(750);

        assert_eq!(format_timestamp(&early), "2024-03-01 08:10:00.250");
        assert_ne!(format_timestamp(&early), format_timestamp(&late));
        assert_eq!(parse_timestamp(&format_timestamp(&late), "t").unwrap(), late);
        // Stored strings still sort in time order.
        assert!(format_timestamp(&at(8, 10, 0)) < format_timestamp(&early));
        assert!(format_timestamp(&late) < format_timestamp(&at(8, 10, 1)));
    }

    #[test]
    fn integer_conversions_guard_ranges() {
        assert_eq!(to_i64(42).unwrap(), 42);
        assert!(to_i64(u64::MAX).is_err());
        assert_eq!(to_u64(7, "duration_seconds").unwrap(), 7);
        assert!(to_u64(-1, "duration_seconds").is_err());
    }
}
