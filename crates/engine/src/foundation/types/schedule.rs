//! Check schedules
//!
//! A schedule is a cron expression or `@every <duration>` in humantime syntax, with
//! occurrences aligned to the Unix epoch. Cron takes the standard 5 fields or 6 with a
//! leading seconds field; without one, checks run at second 0.

use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::Error;
use crate::foundation::types::Timestamp;

const EVERY_PREFIX: &str = "@every";

/// Parsed check schedule of a monitor
pub enum CheckSchedule {
    /// Cron expression
    Cron {
        /// Bit `n` set when second `n` of a matching minute is an occurrence
        seconds: u64,
        /// Minute-level fields
        minutes: Box<saffron::Cron>,
    },
    /// Fixed interval aligned to the epoch
    Every(TimeDelta),
}

impl CheckSchedule {
    /// First occurrence at or after `from`
    pub fn next_from(&self, from: Timestamp) -> Option<Timestamp> {
        match self {
            CheckSchedule::Cron { seconds, minutes } => {
                let mut minute = floor_to_minute(from)?;
                // The second matching minute always yields its first second
                for _ in 0..2 {
                    minute = minutes.next_from(minute)?;
                    let skip = (from - minute).num_seconds().max(0);
                    let skip = if from > minute + TimeDelta::seconds(skip) {
                        skip + 1
                    } else {
                        skip
                    };
                    if let Some(second) = first_second(*seconds, skip) {
                        return Some(minute + TimeDelta::seconds(second));
                    }
                    minute += TimeDelta::minutes(1);
                }
                None
            }
            CheckSchedule::Every(interval) => {
                let step = interval.num_nanoseconds()?;
                let nanos = from.timestamp_nanos_opt()?;
                let remainder = nanos.rem_euclid(step);
                let next = if remainder == 0 {
                    nanos
                } else {
                    nanos.checked_sub(remainder)?.checked_add(step)?
                };
                Some(DateTime::from_timestamp_nanos(next))
            }
        }
    }

    /// First occurrence strictly after `after`
    pub fn next_after(&self, after: Timestamp) -> Option<Timestamp> {
        self.next_from(after + super::tick())
    }
}

fn floor_to_minute(instant: Timestamp) -> Option<Timestamp> {
    DateTime::<Utc>::from_timestamp(instant.timestamp().div_euclid(60) * 60, 0)
}

/// Lowest second at or above `from` present in the `seconds` mask
fn first_second(seconds: u64, from: i64) -> Option<i64> {
    if !(0..60).contains(&from) {
        return None;
    }
    let remaining = seconds >> from;
    (remaining != 0).then(|| from + i64::from(remaining.trailing_zeros()))
}

/// Parse a cron seconds field into a mask of matching seconds
fn parse_seconds(field: &str) -> Option<u64> {
    let mut mask = 0u64;

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, step.parse::<u32>().ok().filter(|s| *s > 0)?),
            None => (item, 1),
        };
        let (start, end) = match range {
            "*" => (0, 59),
            range => match range.split_once('-') {
                Some((start, end)) => (start.parse::<u32>().ok()?, end.parse::<u32>().ok()?),
                // `a/n` runs from `a` to the end of the minute
                None if item.contains('/') => (range.parse::<u32>().ok()?, 59),
                None => {
                    let second = range.parse::<u32>().ok()?;
                    (second, second)
                }
            },
        };
        if start > end || end > 59 {
            return None;
        }

        for second in (start..=end).step_by(step as usize) {
            mask |= 1 << second;
        }
    }

    Some(mask)
}

impl FromStr for CheckSchedule {
    type Err = Error;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let expression = expression.trim();

        if let Some(interval) = expression.strip_prefix(EVERY_PREFIX) {
            let interval = humantime::parse_duration(interval.trim())
                .map_err(|e| Error::validation(format!("invalid interval {expression:?}: {e}")))?;
            let interval = TimeDelta::from_std(interval)
                .map_err(|_| Error::validation(format!("interval {expression:?} is too large")))?;
            if interval <= TimeDelta::zero() {
                return Err(Error::validation(format!(
                    "interval {expression:?} must be positive"
                )));
            }
            return Ok(CheckSchedule::Every(interval));
        }

        let invalid = || Error::validation(format!("invalid cron expression {expression:?}"));

        let fields: Vec<&str> = expression.split_whitespace().collect();
        let (seconds, minutes) = match fields.len() {
            5 => (1, expression.to_string()),
            6 => (parse_seconds(fields[0]).ok_or_else(invalid)?, fields[1..].join(" ")),
            _ => return Err(invalid()),
        };

        let minutes = minutes.parse::<saffron::Cron>().map_err(|_| invalid())?;
        Ok(CheckSchedule::Cron {
            seconds,
            minutes: Box::new(minutes),
        })
    }
}
