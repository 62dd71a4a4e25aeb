// src/scheduler/trigger.rs
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, TimeZone};

use crate::error::SchedulerError;

/// Longest accepted interval: one year.
pub const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Every `period`, first fire one period after start.
    Interval(Duration),
    /// Daily at a wall-clock time in the process's local zone.
    Daily { hour: u32, minute: u32 },
}

impl Trigger {
    pub fn every_minutes(minutes: u64) -> Result<Self, SchedulerError> {
        if minutes == 0 {
            return Err(SchedulerError::InvalidTrigger(
                "interval must be at least one minute".into(),
            ));
        }
        if minutes > MAX_INTERVAL_MINUTES {
            return Err(SchedulerError::InvalidTrigger(format!(
                "interval of {minutes} minutes exceeds {MAX_INTERVAL_MINUTES}"
            )));
        }
        let secs = minutes.checked_mul(60).ok_or_else(|| {
            SchedulerError::InvalidTrigger(format!("interval of {minutes} minutes overflows"))
        })?;
        Ok(Trigger::Interval(Duration::from_secs(secs)))
    }

    pub fn daily_at(hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        if NaiveTime::from_hms_opt(hour, minute, 0).is_none() {
            return Err(SchedulerError::InvalidTrigger(format!(
                "{hour:02}:{minute:02} is not a valid time of day"
            )));
        }
        Ok(Trigger::Daily { hour, minute })
    }

    /// Next daily fire strictly after `now`. Local times that do not exist
    /// (spring-forward gaps) move to the next day that has them.
    pub fn next_daily_after<Tz: TimeZone>(
        now: &DateTime<Tz>,
        hour: u32,
        minute: u32,
    ) -> Option<DateTime<Tz>> {
        let at = NaiveTime::from_hms_opt(hour, minute, 0)?;
        let tz = now.timezone();
        let mut day = now.date_naive();
        for _ in 0..3 {
            if let Some(candidate) = tz.from_local_datetime(&day.and_time(at)).earliest() {
                if candidate > *now {
                    return Some(candidate);
                }
            }
            day = day.checked_add_days(Days::new(1))?;
        }
        None
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval(d) if d.as_secs() % 60 == 0 => write!(f, "every {}m", d.as_secs() / 60),
            Trigger::Interval(d) => write!(f, "every {}s", d.as_secs()),
            Trigger::Daily { hour, minute } => write!(f, "daily at {hour:02}:{minute:02}"),
        }
    }
}
