//! Schedule declarations and next-fire computation.
//!
//! [`ScheduleSpec`] is the loose, declarative form found in configuration
//! (`{ type = "daily", time = "09:00" }`). It is validated once, at
//! registration, into a [`JobSchedule`] which knows how to compute the next
//! fire time in a given timezone.

use std::fmt;

use {
    chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, TimeZone, Timelike, Utc, Weekday},
    chrono_tz::Tz,
    serde::{Deserialize, Serialize},
};

use crate::{
    Error, Result,
    parse::{interval_unit_seconds, parse_minute, parse_time_of_day, parse_weekdays},
};

/// Declarative schedule as written in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ScheduleSpec {
    pub fn hourly(minute: impl Into<String>) -> Self {
        Self {
            kind: "hourly".into(),
            minute: Some(minute.into()),
            ..Self::default()
        }
    }

    pub fn daily(time: impl Into<String>) -> Self {
        Self {
            kind: "daily".into(),
            time: Some(time.into()),
            ..Self::default()
        }
    }

    pub fn weekly(day: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            kind: "weekly".into(),
            day: Some(day.into()),
            time: Some(time.into()),
            ..Self::default()
        }
    }

    pub fn weekdays(time: impl Into<String>) -> Self {
        Self {
            kind: "weekdays".into(),
            time: Some(time.into()),
            ..Self::default()
        }
    }

    pub fn interval(value: u64, unit: impl Into<String>) -> Self {
        Self {
            kind: "interval".into(),
            value: Some(value),
            unit: Some(unit.into()),
            ..Self::default()
        }
    }

    /// Validate into a [`JobSchedule`].
    pub fn validate(&self) -> Result<JobSchedule> {
        JobSchedule::try_from(self)
    }
}

/// A validated schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSchedule {
    /// Every hour at `minute` past.
    Hourly { minute: u32 },
    /// Every day at `time`.
    Daily { time: NaiveTime },
    /// On each of `days` at `time`.
    Weekly { days: Vec<Weekday>, time: NaiveTime },
    /// Monday to Friday at `time`.
    Weekdays { time: NaiveTime },
    /// Every `every`, measured from the previous fire (or registration).
    Interval { every: TimeDelta },
}

impl TryFrom<&ScheduleSpec> for JobSchedule {
    type Error = Error;

    fn try_from(spec: &ScheduleSpec) -> Result<Self> {
        let kind = spec.kind.trim().to_ascii_lowercase();
        let invalid = |e: Error| Error::invalid_schedule(&kind, e.to_string());

        match kind.as_str() {
            "hourly" => {
                let minute = spec.minute.as_deref().unwrap_or(":00");
                Ok(Self::Hourly {
                    minute: parse_minute(minute).map_err(invalid)?,
                })
            },
            "daily" => Ok(Self::Daily {
                time: parse_time_of_day(required(&kind, &spec.time, "time")?).map_err(invalid)?,
            }),
            "weekdays" => Ok(Self::Weekdays {
                time: parse_time_of_day(required(&kind, &spec.time, "time")?).map_err(invalid)?,
            }),
            "weekly" => Ok(Self::Weekly {
                days: parse_weekdays(required(&kind, &spec.day, "day")?).map_err(invalid)?,
                time: parse_time_of_day(required(&kind, &spec.time, "time")?).map_err(invalid)?,
            }),
            "interval" => {
                let value = spec
                    .value
                    .filter(|v| *v > 0)
                    .ok_or_else(|| Error::invalid_schedule(&kind, "'value' must be > 0"))?;
                let unit = interval_unit_seconds(required(&kind, &spec.unit, "unit")?)
                    .map_err(invalid)?;
                let secs = value
                    .checked_mul(unit)
                    .and_then(|s| i64::try_from(s).ok())
                    .and_then(TimeDelta::try_seconds)
                    .ok_or_else(|| Error::invalid_schedule(&kind, "interval out of range"))?;
                Ok(Self::Interval { every: secs })
            },
            _ => Err(Error::unknown_schedule_type(&spec.kind)),
        }
    }
}

impl JobSchedule {
    /// First fire time strictly after `after`, evaluated as wall-clock time in
    /// `tz`. Local times skipped by a DST transition resolve to the next
    /// existing occurrence; ambiguous ones fire at the earlier instant.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every } => after.checked_add_signed(*every),
            Self::Hourly { minute } => {
                let local = after.with_timezone(&tz).naive_local();
                let base = local
                    .date()
                    .and_hms_opt(local.hour(), *minute, 0)?;
                (0..=3)
                    .filter_map(|h| base.checked_add_signed(TimeDelta::hours(h)))
                    .filter_map(|naive| tz.from_local_datetime(&naive).earliest())
                    .map(|dt| dt.with_timezone(&Utc))
                    .find(|dt| *dt > after)
            },
            Self::Daily { time } => next_on_days(after, tz, *time, |_| true),
            Self::Weekdays { time } => next_on_days(after, tz, *time, |d| {
                !matches!(d, Weekday::Sat | Weekday::Sun)
            }),
            Self::Weekly { days, time } => next_on_days(after, tz, *time, |d| days.contains(&d)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hourly { .. } => "hourly",
            Self::Daily { .. } => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Weekdays { .. } => "weekdays",
            Self::Interval { .. } => "interval",
        }
    }
}

fn required<'a>(kind: &str, field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field
        .as_deref()
        .ok_or_else(|| Error::invalid_schedule(kind, format!("missing '{name}'")))
}

fn next_on_days(
    after: DateTime<Utc>,
    tz: Tz,
    time: NaiveTime,
    allowed: impl Fn(Weekday) -> bool,
) -> Option<DateTime<Utc>> {
    let start: NaiveDate = after.with_timezone(&tz).date_naive();
    (0..=8)
        .filter_map(|offset| start.checked_add_signed(TimeDelta::days(offset)))
        .filter(|date| allowed(date.weekday()))
        .filter_map(|date| resolve_local(tz, date, time))
        .find(|dt| *dt > after)
}

fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = date.and_time(time);
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Some(dt.with_timezone(&Utc));
    }
    // Inside a spring-forward gap: walk forward to the first valid minute.
    (1..=180)
        .filter_map(|m| naive.checked_add_signed(TimeDelta::minutes(m)))
        .find_map(|n| tz.from_local_datetime(&n).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

impl fmt::Display for JobSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hourly { minute } => write!(f, "hourly at :{minute:02}"),
            Self::Daily { time } => write!(f, "daily at {}", time.format("%H:%M")),
            Self::Weekdays { time } => write!(f, "weekdays at {}", time.format("%H:%M")),
            Self::Weekly { days, time } => {
                let days: Vec<String> = days.iter().map(ToString::to_string).collect();
                write!(f, "every {} at {}", days.join(","), time.format("%H:%M"))
            },
            Self::Interval { every } => {
                let secs = every.num_seconds();
                match secs {
                    s if s % 604_800 == 0 => write!(f, "every {}w", s / 604_800),
                    s if s % 86_400 == 0 => write!(f, "every {}d", s / 86_400),
                    s if s % 3_600 == 0 => write!(f, "every {}h", s / 3_600),
                    s if s % 60 == 0 => write!(f, "every {}m", s / 60),
                    s => write!(f, "every {s}s"),
                }
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_unknown_type_rejected() {
        let spec = ScheduleSpec {
            kind: "fortnightly".into(),
            ..ScheduleSpec::default()
        };
        assert!(matches!(
            spec.validate(),
            Err(Error::UnknownScheduleType { kind }) if kind == "fortnightly"
        ));
    }

    #[rstest]
    #[case(ScheduleSpec::daily("9am"))]
    #[case(ScheduleSpec::hourly(":75"))]
    #[case(ScheduleSpec::weekly("someday", "10:00"))]
    #[case(ScheduleSpec::interval(0, "minutes"))]
    #[case(ScheduleSpec::interval(5, "parsecs"))]
    #[case(ScheduleSpec { kind: "daily".into(), ..ScheduleSpec::default() })]
    fn test_invalid_fields_rejected(#[case] spec: ScheduleSpec) {
        assert!(matches!(
            spec.validate(),
            Err(Error::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_spec_deserializes_from_toml_shape() {
        let spec: ScheduleSpec =
            serde_json::from_str(r#"{"type":"weekly","day":"friday","time":"23:45"}"#).unwrap();
        assert_eq!(spec, ScheduleSpec::weekly("friday", "23:45"));
    }

    #[test]
    fn test_hourly_next() {
        let s = ScheduleSpec::hourly(":05").validate().unwrap();
        assert_eq!(
            s.next_after(utc("2026-01-05T10:00:00Z"), Tz::UTC),
            Some(utc("2026-01-05T10:05:00Z"))
        );
        // Exactly on the boundary moves to the next hour.
        assert_eq!(
            s.next_after(utc("2026-01-05T10:05:00Z"), Tz::UTC),
            Some(utc("2026-01-05T11:05:00Z"))
        );
        assert_eq!(
            s.next_after(utc("2026-01-05T23:30:00Z"), Tz::UTC),
            Some(utc("2026-01-06T00:05:00Z"))
        );
    }

    #[test]
    fn test_daily_next() {
        let s = ScheduleSpec::daily("09:00").validate().unwrap();
        assert_eq!(
            s.next_after(utc("2026-01-05T08:00:00Z"), Tz::UTC),
            Some(utc("2026-01-05T09:00:00Z"))
        );
        assert_eq!(
            s.next_after(utc("2026-01-05T09:00:00Z"), Tz::UTC),
            Some(utc("2026-01-06T09:00:00Z"))
        );
    }

    #[test]
    fn test_daily_in_timezone() {
        let s = ScheduleSpec::daily("09:00").validate().unwrap();
        // 09:00 in New York during EST is 14:00 UTC.
        assert_eq!(
            s.next_after(utc("2026-01-05T12:00:00Z"), chrono_tz::America::New_York),
            Some(utc("2026-01-05T14:00:00Z"))
        );
    }

    #[test]
    fn test_weekdays_skip_weekend() {
        let s = ScheduleSpec::weekdays("16:00").validate().unwrap();
        // 2026-01-09 is a Friday.
        assert_eq!(
            s.next_after(utc("2026-01-09T17:00:00Z"), Tz::UTC),
            Some(utc("2026-01-12T16:00:00Z"))
        );
    }

    #[test]
    fn test_weekly_multiple_days() {
        let s = ScheduleSpec::weekly("monday,friday", "23:45")
            .validate()
            .unwrap();
        // Tuesday 2026-01-06 → Friday 2026-01-09.
        assert_eq!(
            s.next_after(utc("2026-01-06T00:00:00Z"), Tz::UTC),
            Some(utc("2026-01-09T23:45:00Z"))
        );
        // Friday after the slot → Monday.
        assert_eq!(
            s.next_after(utc("2026-01-09T23:46:00Z"), Tz::UTC),
            Some(utc("2026-01-12T23:45:00Z"))
        );
    }

    #[test]
    fn test_interval_next() {
        let s = ScheduleSpec::interval(30, "minutes").validate().unwrap();
        assert_eq!(
            s.next_after(utc("2026-01-05T10:07:00Z"), Tz::UTC),
            Some(utc("2026-01-05T10:37:00Z"))
        );
    }

    #[test]
    fn test_spring_forward_gap() {
        // 2026-03-08 02:30 does not exist in New York; fire at 03:00 EDT.
        let s = ScheduleSpec::daily("02:30").validate().unwrap();
        assert_eq!(
            s.next_after(utc("2026-03-08T05:00:00Z"), chrono_tz::America::New_York),
            Some(utc("2026-03-08T07:00:00Z"))
        );
    }

    #[rstest]
    #[case(ScheduleSpec::hourly(":05"), "hourly at :05")]
    #[case(ScheduleSpec::daily("09:00"), "daily at 09:00")]
    #[case(ScheduleSpec::weekly("fri", "23:45"), "every Fri at 23:45")]
    #[case(ScheduleSpec::interval(30, "minutes"), "every 30m")]
    #[case(ScheduleSpec::interval(2, "weeks"), "every 2w")]
    fn test_display(#[case] spec: ScheduleSpec, #[case] expected: &str) {
        assert_eq!(spec.validate().unwrap().to_string(), expected);
    }
}
