//! Five-field cron expressions
//!
//! `minute hour day-of-month month day-of-week`, with `*`, lists, ranges,
//! steps and three-letter month/weekday names. Evaluated on the wall clock of
//! a time zone. When both day fields are restricted a day matches either one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::{ScheduleError, ScheduleResult};

const MONTH_NAMES: &[(&str, u32)] = &[
    ("JAN", 1),
    ("FEB", 2),
    ("MAR", 3),
    ("APR", 4),
    ("MAY", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AUG", 8),
    ("SEP", 9),
    ("OCT", 10),
    ("NOV", 11),
    ("DEC", 12),
];

const WEEKDAY_NAMES: &[(&str, u32)] = &[
    ("SUN", 0),
    ("MON", 1),
    ("TUE", 2),
    ("WED", 3),
    ("THU", 4),
    ("FRI", 5),
    ("SAT", 6),
];

/// Days scanned before giving up; covers leap-day-only schedules
const SEARCH_DAYS: i64 = 366 * 8;

/// A parsed cron schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    expression: String,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days: Vec<u32>,
    months: Vec<u32>,
    weekdays: Vec<u32>,
    any_day: bool,
    any_weekday: bool,
}

impl Schedule {
    pub fn parse(expression: &str) -> ScheduleResult<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 fields, found {}", fields.len()),
            });
        }

        let mut weekdays = parse_field(fields[4], "day-of-week", 0, 7, WEEKDAY_NAMES)?;
        // 7 is an alias for Sunday
        if weekdays.contains(&7) {
            weekdays.retain(|d| *d != 7);
            if !weekdays.contains(&0) {
                weekdays.insert(0, 0);
            }
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes: parse_field(fields[0], "minute", 0, 59, &[])?,
            hours: parse_field(fields[1], "hour", 0, 23, &[])?,
            days: parse_field(fields[2], "day-of-month", 1, 31, &[])?,
            months: parse_field(fields[3], "month", 1, 12, MONTH_NAMES)?,
            weekdays,
            any_day: fields[2] == "*",
            any_weekday: fields[4] == "*",
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `after`, read on the `zone` wall clock.
    /// Local times skipped by a DST jump never fire; repeated ones fire on
    /// their first occurrence.
    pub fn next_after<Z: TimeZone>(&self, after: DateTime<Utc>, zone: &Z) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(zone).naive_local();
        let start = local.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        let mut date = start.date();
        for _ in 0..SEARCH_DAYS {
            if self.day_matches(date) {
                for &hour in &self.hours {
                    for &minute in &self.minutes {
                        let Some(candidate) = date.and_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        if candidate < start {
                            continue;
                        }
                        let Some(fire) = zone.from_local_datetime(&candidate).earliest() else {
                            continue;
                        };
                        let fire = fire.with_timezone(&Utc);
                        if fire > after {
                            return Some(fire);
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        let dom = self.days.contains(&date.day());
        let dow = self
            .weekdays
            .contains(&date.weekday().num_days_from_sunday());
        match (self.any_day, self.any_weekday) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_field(
    field: &str,
    name: &'static str,
    min: u32,
    max: u32,
    names: &[(&str, u32)],
) -> ScheduleResult<Vec<u32>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid(field, name, "bad step"))?;
                if step == 0 {
                    return Err(invalid(field, name, "step must be positive"));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (value(lo, name, min, max, names)?, value(hi, name, min, max, names)?)
        } else {
            let lo = value(range, name, min, max, names)?;
            // `a/n` runs to the end of the field
            (lo, if step > 1 { max } else { lo })
        };
        if lo > hi {
            return Err(invalid(field, name, "range start after end"));
        }

        values.extend((lo..=hi).step_by(step as usize));
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn value(token: &str, name: &'static str, min: u32, max: u32, names: &[(&str, u32)]) -> ScheduleResult<u32> {
    let upper = token.to_ascii_uppercase();
    if let Some((_, v)) = names.iter().find(|(n, _)| *n == upper) {
        return Ok(*v);
    }
    let v: u32 = token
        .parse()
        .map_err(|_| invalid(token, name, "not a number"))?;
    if v < min || v > max {
        return Err(ScheduleError::FieldOutOfRange {
            field: name,
            value: v,
            min,
            max,
        });
    }
    Ok(v)
}

fn invalid(token: &str, name: &str, reason: &str) -> ScheduleError {
    ScheduleError::InvalidExpression {
        expression: token.to_string(),
        reason: format!("{name}: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Madrid;
    use chrono_tz::Tz;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_weekly_lottery_fires_friday_evening_in_summer() {
        let schedule = Schedule::parse("03 23 * * FRI").unwrap();
        // Monday 2024-07-01, Madrid on +02:00
        let next = schedule
            .next_after(utc("2024-07-01T10:00:00Z"), &Madrid)
            .unwrap();
        assert_eq!(next, utc("2024-07-05T21:03:00Z"));
    }

    #[test]
    fn test_weekly_lottery_fires_friday_evening_in_winter() {
        let schedule = Schedule::parse("03 23 * * FRI").unwrap();
        // Monday 2024-01-08, Madrid on +01:00
        let next = schedule
            .next_after(utc("2024-01-08T10:00:00Z"), &Madrid)
            .unwrap();
        assert_eq!(next, utc("2024-01-12T22:03:00Z"));
    }

    #[test]
    fn test_skipped_local_time_moves_to_next_day() {
        // 02:30 does not exist in Madrid on 2024-03-31
        let schedule = Schedule::parse("30 2 * * *").unwrap();
        let next = schedule
            .next_after(utc("2024-03-30T23:00:00Z"), &Madrid)
            .unwrap();
        assert_eq!(next, utc("2024-04-01T00:30:00Z"));
    }

    #[test]
    fn test_repeated_local_time_fires_once() {
        // 02:30 happens twice in Madrid on 2024-10-27
        let schedule = Schedule::parse("30 2 * * *").unwrap();
        let first = schedule
            .next_after(utc("2024-10-26T22:00:00Z"), &Madrid)
            .unwrap();
        assert_eq!(first, utc("2024-10-27T00:30:00Z"));
        let second = schedule.next_after(first, &Madrid).unwrap();
        assert_eq!(second, utc("2024-10-28T01:30:00Z"));
    }

    #[test]
    fn test_daily_reset_is_strictly_after() {
        let schedule = Schedule::parse("0 12 * * *").unwrap();
        let zone = Tz::UTC;

        let at_noon = utc("2024-06-03T12:00:00Z");
        assert_eq!(
            schedule.next_after(at_noon, &zone).unwrap(),
            utc("2024-06-04T12:00:00Z")
        );
        assert_eq!(
            schedule
                .next_after(utc("2024-06-03T11:59:30Z"), &zone)
                .unwrap(),
            at_noon
        );
    }

    #[test]
    fn test_sunday_aliases() {
        let named = Schedule::parse("0 0 * * SUN").unwrap();
        let seven = Schedule::parse("0 0 * * 7").unwrap();
        let zero = Schedule::parse("0 0 * * 0").unwrap();
        let after = utc("2024-06-05T00:00:00Z");
        let zone = Tz::UTC;

        let expected = utc("2024-06-09T00:00:00Z");
        assert_eq!(named.next_after(after, &zone), Some(expected));
        assert_eq!(seven.next_after(after, &zone), Some(expected));
        assert_eq!(zero.next_after(after, &zone), Some(expected));
    }

    #[test]
    fn test_steps_lists_and_ranges() {
        let schedule = Schedule::parse("*/15 9-10,14 * * MON-FRI").unwrap();
        assert_eq!(schedule.minutes, vec![0, 15, 30, 45]);
        assert_eq!(schedule.hours, vec![9, 10, 14]);
        assert_eq!(schedule.weekdays, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_day_fields_combine_with_or() {
        // 1st of the month or any Monday
        let schedule = Schedule::parse("0 0 1 * MON").unwrap();
        let zone = Tz::UTC;
        // Tuesday 2024-06-04 -> Monday 2024-06-10
        assert_eq!(
            schedule.next_after(utc("2024-06-04T00:00:00Z"), &zone),
            Some(utc("2024-06-10T00:00:00Z"))
        );
        // Sunday 2024-06-30 -> Monday 2024-07-01, also the 1st
        assert_eq!(
            schedule.next_after(utc("2024-06-25T00:00:00Z"), &zone),
            Some(utc("2024-07-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_leap_day() {
        let schedule = Schedule::parse("0 0 29 FEB *").unwrap();
        let zone = Tz::UTC;
        assert_eq!(
            schedule.next_after(utc("2024-03-01T00:00:00Z"), &zone),
            Some(utc("2028-02-29T00:00:00Z"))
        );
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Schedule::parse("0 12 * *").is_err());
        assert!(Schedule::parse("61 12 * * *").is_err());
        assert!(Schedule::parse("0 12 * * FUNDAY").is_err());
        assert!(Schedule::parse("*/0 * * * *").is_err());
        assert!(Schedule::parse("30-10 * * * *").is_err());
    }
}
