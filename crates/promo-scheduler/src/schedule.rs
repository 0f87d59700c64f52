use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// The two recurring jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    DailyReset,
    WeeklyReset,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyReset => write!(f, "daily_reset"),
            Self::WeeklyReset => write!(f, "weekly_reset"),
        }
    }
}

/// When the jobs fire, in UTC.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    pub daily_at: NaiveTime,
    pub weekly_on: Weekday,
    pub weekly_at: NaiveTime,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            daily_at: NaiveTime::MIN,
            weekly_on: Weekday::Mon,
            weekly_at: NaiveTime::MIN,
        }
    }
}

impl Schedule {
    /// The first firing of `job` strictly after `after`.
    pub fn next_fire(&self, job: Job, after: DateTime<Utc>) -> DateTime<Utc> {
        match job {
            Job::DailyReset => self.next_daily(after),
            Job::WeeklyReset => self.next_weekly(after),
        }
    }

    pub fn next_daily(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let today = after.date_naive().and_time(self.daily_at).and_utc();
        if today > after {
            today
        } else {
            today + Duration::days(1)
        }
    }

    pub fn next_weekly(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let ahead = (7 + self.weekly_on.num_days_from_monday()
            - after.weekday().num_days_from_monday())
            % 7;
        let candidate = (after.date_naive() + Duration::days(i64::from(ahead)))
            .and_time(self.weekly_at)
            .and_utc();
        if candidate > after {
            candidate
        } else {
            candidate + Duration::days(7)
        }
    }
}
