//! Cron schedule evaluation.

use crate::error::ScheduleError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A parsed cron expression.
///
/// Five-field expressions are minute-first, as in crontab, with day-of-week
/// counted from Sunday as 0 (7 is also Sunday). Six and seven field
/// expressions start with seconds, may end with a year, and count
/// day-of-week from Sunday as 1.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    /// Parses a cron expression.
    ///
    /// # Errors
    ///
    /// Returns an error if the expression has the wrong number of fields or
    /// a field cannot be parsed.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        let invalid = |reason: String| ScheduleError::InvalidCronExpression {
            expression: trimmed.to_string(),
            reason,
        };

        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let day_of_week = crontab_day_of_week(fields[4]).map_err(invalid)?;
                format!("0 {} {day_of_week}", fields[..4].join(" "))
            }
            6 | 7 => trimmed.to_string(),
            n => return Err(invalid(format!("expected 5 to 7 fields, got {n}"))),
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    /// Returns the expression as written.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the first occurrence strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Returns the next occurrence from now.
    ///
    /// # Errors
    ///
    /// Returns `NoUpcoming` if the schedule never fires again.
    pub fn next_from_now(&self) -> Result<DateTime<Utc>, ScheduleError> {
        self.next_after(Utc::now())
            .ok_or_else(|| ScheduleError::NoUpcoming {
                expression: self.expression.clone(),
            })
    }
}

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Rewrites a crontab day-of-week field into day names.
fn crontab_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: u8 = step
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| format!("invalid day-of-week step '{step}'"))?;
                (base, Some(step))
            }
            None => (item, None),
        };
        let (start, end) = match base {
            "*" | "?" => (0, 6),
            _ => match base.split_once('-') {
                Some((from, to)) => (crontab_day(from)?, crontab_day(to)?),
                None => {
                    let day = crontab_day(base)?;
                    (day, if step.is_some() { 6 } else { day })
                }
            },
        };
        if start > end {
            return Err(format!("day-of-week range '{base}' runs backwards"));
        }
        for day in (start..=end).step_by(usize::from(step.unwrap_or(1))) {
            days[usize::from(day % 7)] = true;
        }
    }

    Ok(days
        .iter()
        .zip(DAY_NAMES)
        .filter(|(set, _)| **set)
        .map(|(_, name)| name)
        .collect::<Vec<_>>()
        .join(","))
}

fn crontab_day(text: &str) -> Result<u8, String> {
    if let Some(index) = DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(text))
    {
        return u8::try_from(index).map_err(|e| e.to_string());
    }
    text.parse::<u8>()
        .ok()
        .filter(|day| *day <= 7)
        .ok_or_else(|| format!("invalid day-of-week '{text}'"))
}
