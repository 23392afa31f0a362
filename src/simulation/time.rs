//! EnergyPlus timestamp handling
//!
//! EnergyPlus reports `Date/Time` as ` MM/DD  HH:MM:SS` without a year and
//! marks the end of a day as `24:00:00`.

use crate::error::SimulationError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Parse a simulation timestamp, stamping it with `year`
///
/// `24:00:00` is midnight at the start of the following day, so
/// `12/31 24:00:00` becomes January 1 of `year + 1`.
pub fn parse_simulation_time(raw: &str, year: i32) -> Result<NaiveDateTime, SimulationError> {
    let invalid = || SimulationError::InvalidTimestamp(raw.trim().to_string());

    let mut parts = raw.split_whitespace();
    let (date_part, time_part) = match (parts.next(), parts.next(), parts.next()) {
        (Some(d), Some(t), None) => (d, t),
        _ => return Err(invalid()),
    };

    let (month, day) = split_pair(date_part, '/').ok_or_else(invalid)?;
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;

    let fields: Vec<u32> = time_part
        .split(':')
        .map(|p| p.parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    let [hour, minute, second] = fields[..] else {
        return Err(invalid());
    };

    if (hour, minute, second) == (24, 0, 0) {
        let next = date.succ_opt().ok_or_else(invalid)?;
        return Ok(next.and_time(NaiveTime::default()));
    }

    let time = NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(invalid)?;
    Ok(date.and_time(time))
}

/// Format a simulation time the way it is published (`2005-01-01T01:00:00Z`)
pub fn format_timestamp(time: &NaiveDateTime) -> String {
    format!("{}Z", time.format("%Y-%m-%dT%H:%M:%S"))
}

fn split_pair(s: &str, sep: char) -> Option<(u32, u32)> {
    let (a, b) = s.split_once(sep)?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> String {
        format_timestamp(&parse_simulation_time(raw, 2005).unwrap())
    }

    #[test]
    fn test_regular_timestamp() {
        assert_eq!(ts(" 01/01  01:00:00"), "2005-01-01T01:00:00Z");
        assert_eq!(ts("07/15 13:30:00"), "2005-07-15T13:30:00Z");
    }

    #[test]
    fn test_end_of_day_rolls_over() {
        assert_eq!(ts(" 01/01  24:00:00"), "2005-01-02T00:00:00Z");
        assert_eq!(ts(" 02/28  24:00:00"), "2005-03-01T00:00:00Z");
        assert_eq!(ts(" 12/31  24:00:00"), "2006-01-01T00:00:00Z");
    }

    #[test]
    fn test_invalid_timestamps() {
        for raw in [
            "",
            "01/01",
            "13/01 01:00:00",
            "02/29 01:00:00",
            "01/01 25:00:00",
            "01/01 24:00:01",
            "01/01 01:00",
            "01-01 01:00:00",
            "01/01 01:00:00 extra",
        ] {
            assert!(
                matches!(
                    parse_simulation_time(raw, 2005),
                    Err(SimulationError::InvalidTimestamp(_))
                ),
                "expected {raw:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_leap_year_is_honored() {
        assert_eq!(
            format_timestamp(&parse_simulation_time("02/29 10:00:00", 2004).unwrap()),
            "2004-02-29T10:00:00Z"
        );
    }
}
