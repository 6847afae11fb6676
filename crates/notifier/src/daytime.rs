//! Wall-clock helpers: `HH:MM` strings, minutes of the day, and the fixed
//! UTC offset the bot treats as "local time".

use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};

/// Number of one-minute slots on the daily ring.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// A user-supplied time string that is not a valid `HH:MM` value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time format '{input}': expected HH:MM in 24h format (e.g. 13:45)")]
pub struct InvalidTimeFormat {
    pub input: String,
}

/// Parse `"H:M"` into minutes since midnight.
///
/// Hours may be 0..=24 and minutes 0..=59; leading zeros are optional so
/// `"9:30"` and `"09:30"` are equivalent. `"24:00"` yields 1440, the
/// end-of-day sentinel; hour 24 takes no other minutes. Returns `None` for
/// anything else.
pub fn parse_time_in_minutes(s: &str) -> Option<u16> {
    let (h, m) = s.split_once(':')?;
    let hours: i32 = h.trim().parse().ok()?;
    let minutes: i32 = m.trim().parse().ok()?;

    if !(0..=24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }

    let total = (hours * 60 + minutes) as u16;
    (total <= MINUTES_PER_DAY).then_some(total)
}

/// Format minutes since midnight as zero-padded `HH:MM`.
pub fn minutes_to_hhmm(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Strict form used for user-facing input: exactly two digits, a colon, two
/// digits, and a value [`parse_time_in_minutes`] accepts.
pub fn validate_hhmm(s: &str) -> Result<u16, InvalidTimeFormat> {
    let bytes = s.as_bytes();
    let shaped = bytes.len() == 5
        && bytes[2] == b':'
        && [0, 1, 3, 4].iter().all(|&i| bytes[i].is_ascii_digit());

    shaped
        .then(|| parse_time_in_minutes(s))
        .flatten()
        .ok_or_else(|| InvalidTimeFormat {
            input: s.to_string(),
        })
}

/// Minute of the day (0..1440) of `at`, read in the wall clock of `offset`.
pub fn minute_of_day(at: OffsetDateTime, offset: UtcOffset) -> u16 {
    let local = at.to_offset(offset);
    local.hour() as u16 * 60 + local.minute() as u16
}

/// Build a fixed offset from whole minutes east of UTC.
pub fn offset_from_minutes(minutes: i32) -> Option<UtcOffset> {
    UtcOffset::from_whole_seconds(minutes.checked_mul(60)?).ok()
}

/// Render a remaining duration the way the bot prints it: `"2h 5min"`.
pub fn format_remaining(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{}h {}min", secs / 3600, (secs % 3600) / 60)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    // -- parse_time_in_minutes ----------------------------------------------

    #[test]
    fn parses_valid_times() {
        assert_eq!(parse_time_in_minutes("00:00"), Some(0));
        assert_eq!(parse_time_in_minutes("09:30"), Some(570));
        assert_eq!(parse_time_in_minutes("12:00"), Some(720));
        assert_eq!(parse_time_in_minutes("23:59"), Some(1439));
    }

    #[test]
    fn accepts_24_00_as_end_of_day() {
        assert_eq!(parse_time_in_minutes("24:00"), Some(1440));
    }

    #[test]
    fn rejects_minutes_past_24_00() {
        assert_eq!(parse_time_in_minutes("24:01"), None);
        assert_eq!(parse_time_in_minutes("24:30"), None);
        assert_eq!(parse_time_in_minutes("24:59"), None);
        assert!(validate_hhmm("24:01").is_err());
        assert!(validate_hhmm("24:59").is_err());
    }

    #[test]
    fn accepts_missing_leading_zeros() {
        assert_eq!(parse_time_in_minutes("9:30"), Some(570));
        assert_eq!(parse_time_in_minutes("09:3"), Some(9 * 60 + 3));
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(parse_time_in_minutes("25:00"), None);
        assert_eq!(parse_time_in_minutes("12:60"), None);
        assert_eq!(parse_time_in_minutes("-1:00"), None);
        assert_eq!(parse_time_in_minutes("12:-1"), None);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_time_in_minutes("invalid"), None);
        assert_eq!(parse_time_in_minutes("ab:cd"), None);
        assert_eq!(parse_time_in_minutes("12:xy"), None);
        assert_eq!(parse_time_in_minutes(""), None);
    }

    // -- minutes_to_hhmm ----------------------------------------------------

    #[test]
    fn formats_with_padding() {
        assert_eq!(minutes_to_hhmm(0), "00:00");
        assert_eq!(minutes_to_hhmm(5), "00:05");
        assert_eq!(minutes_to_hhmm(65), "01:05");
        assert_eq!(minutes_to_hhmm(1380), "23:00");
        assert_eq!(minutes_to_hhmm(1439), "23:59");
    }

    #[test]
    fn every_minute_of_the_day_round_trips() {
        for m in 0..MINUTES_PER_DAY {
            let s = minutes_to_hhmm(m);
            assert_eq!(parse_time_in_minutes(&s), Some(m), "round trip of {s}");
            assert_eq!(minutes_to_hhmm(parse_time_in_minutes(&s).unwrap()), s);
        }
    }

    // -- validate_hhmm ------------------------------------------------------

    #[test]
    fn strict_validation_accepts_two_digit_form() {
        assert_eq!(validate_hhmm("13:45"), Ok(825));
        assert_eq!(validate_hhmm("24:00"), Ok(1440));
    }

    #[test]
    fn strict_validation_rejects_lenient_forms() {
        for bad in ["9:30", "09:3", "0930", "ab:cd", "25:00", "12:60", " 9:30", "12:345"] {
            let err = validate_hhmm(bad).unwrap_err();
            assert_eq!(err.input, bad);
        }
    }

    #[test]
    fn invalid_time_message_mentions_input() {
        let err = validate_hhmm("7h30").unwrap_err();
        assert!(err.to_string().contains("'7h30'"), "got: {err}");
    }

    // -- minute_of_day / offsets --------------------------------------------

    #[test]
    fn minute_of_day_in_utc() {
        let at = datetime!(2025-06-01 13:45:59 UTC);
        assert_eq!(minute_of_day(at, UtcOffset::UTC), 825);
    }

    #[test]
    fn minute_of_day_shifts_with_offset() {
        let at = datetime!(2025-06-01 23:30 UTC);
        assert_eq!(minute_of_day(at, offset!(+2)), 90);
        assert_eq!(minute_of_day(at, offset!(-1)), 22 * 60 + 30);
    }

    #[test]
    fn offset_from_minutes_bounds() {
        assert_eq!(offset_from_minutes(120), Some(offset!(+2)));
        assert_eq!(offset_from_minutes(-330), Some(offset!(-5:30)));
        assert_eq!(offset_from_minutes(26 * 60), None);
    }

    #[test]
    fn remaining_formatting() {
        assert_eq!(format_remaining(0), "0h 0min");
        assert_eq!(format_remaining(3 * 3600 + 5 * 60 + 59), "3h 5min");
        assert_eq!(format_remaining(-10), "0h 0min");
    }
}
