//! Five-field cron definitions as stored on a job definition.
//!
//! Fields are kept as the raw strings an operator entered and validated into a
//! [`cron::Schedule`] on demand. The seconds field is always pinned to `0`.
//!
//! Day-of-week numbers follow the `0 = Monday … 6 = Sunday` convention used by
//! the stored data. The `cron` crate numbers days from Sunday, so the field is
//! expanded into an explicit list of day names before parsing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const DAY_NAMES: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronFields {
    pub minute: String,
    pub hour: String,
    pub day_of_month: String,
    pub day_of_week: String,
    pub month: String,
}

impl Default for CronFields {
    fn default() -> Self {
        Self {
            minute: "*".to_string(),
            hour: "*".to_string(),
            day_of_month: "*".to_string(),
            day_of_week: "*".to_string(),
            month: "*".to_string(),
        }
    }
}

impl CronFields {
    /// Fields that fire on the given minute pattern every hour of every day.
    pub fn every_minute_matching(minute: &str) -> Self {
        Self {
            minute: minute.to_string(),
            ..Self::default()
        }
    }

    /// Validate every field and build the schedule (second fixed at `0`).
    ///
    /// The first offending field is reported by name.
    pub fn schedule(&self) -> Result<cron::Schedule, ValidationError> {
        let minute = check_field("minute", &self.minute)?;
        let hour = check_field("hour", &self.hour)?;
        let day_of_month = check_field("day_of_month", &self.day_of_month)?;
        let month = check_field("month", &self.month)?;
        let day_of_week = normalize_day_of_week(check_field("day_of_week", &self.day_of_week)?)?;

        // Parse each field on its own first so the error names the culprit.
        for (field, value, expr) in [
            ("minute", minute, format!("0 {minute} * * * *")),
            ("hour", hour, format!("0 * {hour} * * *")),
            ("day_of_month", day_of_month, format!("0 * * {day_of_month} * *")),
            ("month", month, format!("0 * * * {month} *")),
            ("day_of_week", self.day_of_week.trim(), format!("0 * * * * {day_of_week}")),
        ] {
            cron::Schedule::from_str(&expr).map_err(|e| ValidationError::InvalidCronField {
                field,
                value: value.to_string(),
                reason: e.to_string(),
            })?;
        }

        let expr = format!("0 {minute} {hour} {day_of_month} {month} {day_of_week}");
        cron::Schedule::from_str(&expr).map_err(|e| ValidationError::InvalidCronField {
            field: "expression",
            value: expr.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for CronFields {
    /// Classic crontab order: minute hour day-of-month month day-of-week.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month, self.day_of_week
        )
    }
}

fn check_field<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidCronField {
            field,
            value: value.to_string(),
            reason: "field is empty".to_string(),
        });
    }
    if trimmed.split_whitespace().count() > 1 {
        return Err(ValidationError::InvalidCronField {
            field,
            value: value.to_string(),
            reason: "field must not contain whitespace".to_string(),
        });
    }
    Ok(trimmed)
}

/// Expand the field into the days it names (`0` = Monday) and render them as
/// a list of day names. Ranges and steps are resolved here, so a range that
/// ends on Sunday never wraps in the `cron` crate's Sunday-first numbering.
fn normalize_day_of_week(value: &str) -> Result<String, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidCronField {
        field: "day_of_week",
        value: value.to_string(),
        reason,
    };

    let mut days = [false; 7];
    for item in value.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(parse_step(step).map_err(&invalid)?)),
            None => (item, None),
        };

        let (first, last) = if base == "*" {
            (0, 6)
        } else if let Some((first, last)) = base.split_once('-') {
            (
                day_index(first).map_err(&invalid)?,
                day_index(last).map_err(&invalid)?,
            )
        } else {
            let day = day_index(base).map_err(&invalid)?;
            // `n/step` runs from `n` through Sunday
            if step.is_some() {
                (day, 6)
            } else {
                (day, day)
            }
        };
        if first > last {
            return Err(invalid(format!(
                "range {} runs backwards",
                base.to_ascii_uppercase()
            )));
        }

        for day in (first..=last).step_by(step.unwrap_or(1)) {
            days[day] = true;
        }
    }

    if days.iter().all(|on| *on) {
        return Ok("*".to_string());
    }
    let names: Vec<&str> = DAY_NAMES
        .iter()
        .zip(days)
        .filter(|(_, on)| *on)
        .map(|(name, _)| *name)
        .collect();
    Ok(names.join(","))
}

fn parse_step(step: &str) -> Result<usize, String> {
    step.parse::<usize>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("invalid step {step:?}"))
}

fn day_index(token: &str) -> Result<usize, String> {
    if token.is_empty() {
        return Err("empty day".to_string());
    }
    if let Ok(n) = token.parse::<usize>() {
        return if n < DAY_NAMES.len() {
            Ok(n)
        } else {
            Err(format!("day number {n} out of range 0-6"))
        };
    }
    let upper = token.to_ascii_uppercase();
    DAY_NAMES
        .iter()
        .position(|name| *name == upper)
        .ok_or_else(|| format!("unknown day {token:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Utc};

    fn fields(minute: &str, hour: &str, dom: &str, dow: &str, month: &str) -> CronFields {
        CronFields {
            minute: minute.into(),
            hour: hour.into(),
            day_of_month: dom.into(),
            day_of_week: dow.into(),
            month: month.into(),
        }
    }

    #[test]
    fn every_five_minutes_fires_on_zero_second() {
        let schedule = CronFields::every_minute_matching("*/5").schedule().unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap();
        let next = schedule.after(&from).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap());
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn numeric_day_of_week_starts_at_monday() {
        // 2024-01-01 is a Monday.
        let schedule = fields("0", "9", "*", "0", "*").schedule().unwrap();
        let from = Utc.with_ymd_and_hms(2023, 12, 30, 0, 0, 0).unwrap();
        let next = schedule.after(&from).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn weekday_range_skips_weekend() {
        let schedule = fields("30", "6", "*", "0-4", "*").schedule().unwrap();
        // Saturday 2024-01-06
        let from = Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap();
        let next = schedule.after(&from).next().unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (6, 30));
    }

    #[test]
    fn named_days_are_accepted_in_any_case() {
        assert!(fields("0", "0", "*", "mon,Wed,FRI", "*").schedule().is_ok());
    }

    #[test]
    fn malformed_minute_is_rejected_by_name() {
        let err = fields("61", "*", "*", "*", "*").schedule().unwrap_err();
        match err {
            ValidationError::InvalidCronField { field, .. } => assert_eq!(field, "minute"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_and_whitespace_fields_are_rejected() {
        assert!(fields("", "*", "*", "*", "*").schedule().is_err());
        assert!(fields("1 2", "*", "*", "*", "*").schedule().is_err());
    }

    #[test]
    fn out_of_range_day_number_is_rejected() {
        let err = fields("0", "0", "*", "7", "*").schedule().unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidCronField { field: "day_of_week", .. }
        ));
    }

    #[test]
    fn full_week_range_includes_sunday() {
        let schedule = fields("0", "12", "*", "0-6", "*").schedule().unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 6, 13, 0, 0).unwrap();
        let next = schedule.after(&from).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 7, 12, 0, 0).unwrap());
        assert_eq!(next.weekday(), chrono::Weekday::Sun);
    }

    #[test]
    fn weekend_range_fires_saturday_and_sunday_only() {
        let schedule = fields("0", "8", "*", "5-6", "*").schedule().unwrap();
        // Friday 2024-01-05
        let from = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let days: Vec<_> = schedule.after(&from).take(3).map(|t| t.weekday()).collect();
        assert_eq!(
            days,
            vec![chrono::Weekday::Sat, chrono::Weekday::Sun, chrono::Weekday::Sat]
        );
    }

    #[test]
    fn named_range_ending_on_sunday_is_accepted() {
        let schedule = fields("0", "0", "*", "fri-sun", "*").schedule().unwrap();
        // Sunday 2024-01-07, after midnight
        let from = Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 1).unwrap();
        let next = schedule.after(&from).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 12, 0, 0, 0).unwrap());
        assert!(fields("0", "0", "*", "sat-sun", "*").schedule().is_ok());
    }

    #[test]
    fn stepped_days_count_from_monday() {
        assert_eq!(normalize_day_of_week("*/2").unwrap(), "MON,WED,FRI,SUN");
        assert_eq!(normalize_day_of_week("4/1").unwrap(), "FRI,SAT,SUN");
        assert_eq!(normalize_day_of_week("sun,0").unwrap(), "MON,SUN");
        assert_eq!(normalize_day_of_week("0-6").unwrap(), "*");
    }

    #[test]
    fn backwards_range_and_zero_step_are_rejected() {
        for dow in ["6-0", "*/0", "mon-"] {
            let err = fields("0", "0", "*", dow, "*").schedule().unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidCronField { field: "day_of_week", .. }),
                "{dow}: {err:?}"
            );
        }
    }
}
