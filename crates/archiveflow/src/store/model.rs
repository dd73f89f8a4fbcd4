use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Url {
    pub id: i64,
    pub url: String,
    pub first_seen: DateTime<Utc>,
    /// Capture time of the most recent successful archival, if any.
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Batch {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub locked: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Job {
    pub id: i64,
    pub url_id: i64,
    pub created_at: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub failed: Option<DateTime<Utc>>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub priority: i32,
    pub retry: i32,
}

/// Logical job state, derived from the two terminal timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Completed,
    Failed,
}

impl Job {
    pub fn state(&self) -> JobState {
        match (self.completed, self.failed) {
            (Some(_), _) => JobState::Completed,
            (None, Some(_)) => JobState::Failed,
            (None, None) => JobState::Pending,
        }
    }

    pub fn is_runnable(&self, now: DateTime<Utc>) -> bool {
        self.state() == JobState::Pending
            && self.delayed_until.map_or(true, |until| until <= now)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct RepeatUrl {
    pub id: i64,
    pub url_id: i64,
    pub batch_id: i64,
    /// Seconds between captures while active.
    pub interval: i64,
    pub created_at: DateTime<Utc>,
    pub active_since: Option<DateTime<Utc>>,
}

/// A runnable job joined with the URL it archives, as picked by the scheduler.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedJob {
    pub id: i64,
    pub url_id: i64,
    pub url: String,
    pub priority: i32,
    pub retry: i32,
    pub last_seen: Option<DateTime<Utc>>,
}

/// An active repeater joined with its URL, as loaded by the planner.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueRepeat {
    pub id: i64,
    pub url_id: i64,
    pub batch_id: i64,
    pub interval: i64,
    pub url: String,
    pub last_seen: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn job(completed: Option<DateTime<Utc>>, failed: Option<DateTime<Utc>>) -> Job {
        Job {
            id: 1,
            url_id: 1,
            created_at: Utc::now(),
            completed,
            failed,
            delayed_until: None,
            priority: 0,
            retry: 0,
        }
    }

    #[test]
    fn state_is_derived_from_terminal_timestamps() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        assert_eq!(job(None, None).state(), JobState::Pending);
        assert_eq!(job(Some(t), None).state(), JobState::Completed);
        assert_eq!(job(None, Some(t)).state(), JobState::Failed);
    }

    #[test]
    fn runnable_boundary_is_inclusive() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut j = job(None, None);
        assert!(j.is_runnable(now));

        j.delayed_until = Some(now);
        assert!(j.is_runnable(now));

        j.delayed_until = Some(now + chrono::Duration::milliseconds(1));
        assert!(!j.is_runnable(now));
    }
}
