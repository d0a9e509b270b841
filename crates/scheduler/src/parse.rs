//! Parsing utilities for durations, times of day and weekday lists.

use std::time::Duration;

use chrono::{NaiveTime, Weekday};

use crate::{Error, Result};

/// Parse a human-friendly duration string.
///
/// Supported suffixes: `s` (seconds), `m` (minutes), `h` (hours), `d` (days).
/// Examples: `"30s"`, `"5m"`, `"2h"`, `"1d"`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::message("empty duration string"));
    }

    let (num_str, suffix) = match input.find(|c: char| c.is_alphabetic()) {
        Some(i) => (&input[..i], &input[i..]),
        None => {
            return Err(Error::message(format!(
                "duration missing unit suffix (s/m/h/d): {input}"
            )));
        },
    };

    let value: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::message(format!("invalid number in duration: {num_str}")))?;

    if value == 0 {
        return Err(Error::message("duration must be > 0"));
    }

    let secs = match suffix {
        "s" => Some(value),
        "m" => value.checked_mul(60),
        "h" => value.checked_mul(3_600),
        "d" => value.checked_mul(86_400),
        _ => {
            return Err(Error::message(format!(
                "unknown duration suffix: {suffix} (expected s/m/h/d)"
            )));
        },
    };

    secs.map(Duration::from_secs)
        .ok_or_else(|| Error::message(format!("duration out of range: {input}")))
}

/// Parse `"HH:MM"` or `"HH:MM:SS"` (24-hour clock).
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime> {
    let input = input.trim();
    NaiveTime::parse_from_str(input, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M:%S"))
        .map_err(|_| Error::message(format!("expected HH:MM, got '{input}'")))
}

/// Parse the minute of an hourly schedule: `":05"` or `"05"`.
pub fn parse_minute(input: &str) -> Result<u32> {
    let digits = input.trim().trim_start_matches(':');
    let minute: u32 = digits
        .parse()
        .map_err(|_| Error::message(format!("expected :MM, got '{input}'")))?;
    if minute > 59 {
        return Err(Error::message(format!("minute out of range: {minute}")));
    }
    Ok(minute)
}

/// Parse a comma-separated list of weekday names (`"friday"`, `"mon, wed"`).
///
/// The result is sorted Monday-first with duplicates removed.
pub fn parse_weekdays(input: &str) -> Result<Vec<Weekday>> {
    let mut days = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let day: Weekday = part
            .parse()
            .map_err(|_| Error::message(format!("unknown weekday: {part}")))?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(Error::message("at least one weekday is required"));
    }
    days.sort_by_key(Weekday::num_days_from_monday);
    Ok(days)
}

/// Seconds per unit for interval schedules. Accepts singular and plural.
pub fn interval_unit_seconds(unit: &str) -> Result<u64> {
    let secs = match unit.trim().to_ascii_lowercase().as_str() {
        "second" | "seconds" => 1,
        "minute" | "minutes" => 60,
        "hour" | "hours" => 3_600,
        "day" | "days" => 86_400,
        "week" | "weeks" => 604_800,
        other => {
            return Err(Error::message(format!(
                "unknown interval unit: {other} (expected seconds/minutes/hours/days/weeks)"
            )));
        },
    };
    Ok(secs)
}

/// Render a duration as `1h 02m 03s`, dropping leading zero units.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (h, m, s) = (total / 3_600, (total % 3_600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
