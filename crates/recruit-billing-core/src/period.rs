//! Calendar-month windows in a fixed reference timezone.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::TimePeriod;

/// The calendar month containing `now`, as observed at `offset`.
///
/// The start is the first instant of the month in that timezone, the end is
/// the first instant of the following month.
#[must_use]
pub fn month_window(now: DateTime<Utc>, offset: FixedOffset) -> TimePeriod {
    let local = now.with_timezone(&offset);
    let (year, month) = (local.year(), local.month());
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    TimePeriod {
        start: first_instant(year, month, offset).unwrap_or(now),
        end: first_instant(next_year, next_month, offset).unwrap_or(now),
    }
}

fn first_instant(year: i32, month: u32, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let midnight = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a `+HH:MM` / `-HH:MM` offset (or `Z`).
#[must_use]
pub fn parse_utc_offset(input: &str) -> Option<FixedOffset> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("z") || input.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match input.as_bytes().first()? {
        b'+' => (1, &input[1..]),
        b'-' => (-1, &input[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
