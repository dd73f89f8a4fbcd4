use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enqueue::DEFAULT_REPEAT_INTERVAL;
use crate::store::model::{Job, JobState};

pub const PER_PAGE: i64 = 100;
pub const MAX_PAGE: i64 = 100;

fn default_true() -> bool {
    true
}

fn default_page() -> i64 {
    1
}

fn default_interval() -> i64 {
    DEFAULT_REPEAT_INTERVAL
}

#[derive(Debug, Deserialize)]
pub struct SubmitBatchBody {
    pub urls: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub unique_only: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeclareRepeatBody {
    pub url: String,
    #[serde(default = "default_interval")]
    pub interval: i64,
}

#[derive(Debug, Serialize)]
pub struct RepeatDeclared {
    pub repeat_id: i64,
}

#[derive(Debug, Serialize)]
pub struct PaginationInfo {
    pub current_page: i64,
    pub total_pages: i64,
    pub items: i64,
}

#[derive(Debug, Serialize)]
pub struct PaginationOutput<T> {
    pub data: Vec<T>,
    pub pagination: PaginationInfo,
}

impl<T> PaginationOutput<T> {
    pub fn new(data: Vec<T>, page: i64, items: i64) -> Self {
        Self {
            data,
            pagination: PaginationInfo {
                current_page: page,
                total_pages: items / PER_PAGE + 1,
                items,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub desc: bool,
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    pub after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub desc: bool,
    #[serde(default = "default_true")]
    pub not_started: bool,
    #[serde(default = "default_true")]
    pub completed: bool,
    #[serde(default = "default_true")]
    pub delayed: bool,
    #[serde(default = "default_true")]
    pub failed: bool,
    pub retries_less_than: Option<i32>,
    pub retries_greater_than: Option<i32>,
    pub retries_equal_to: Option<i32>,
}

/// A job with its URL string and batch memberships resolved.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub id: i64,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub failed: Option<DateTime<Utc>>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub priority: i32,
    pub retry: i32,
    pub state: JobState,
    pub batches: Vec<i64>,
}

impl JobView {
    pub fn from_job(job: &Job, url: String, batches: Vec<i64>) -> Self {
        Self {
            id: job.id,
            url,
            created_at: job.created_at,
            completed: job.completed,
            failed: job.failed,
            delayed_until: job.delayed_until,
            priority: job.priority,
            retry: job.retry,
            state: job.state(),
            batches,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CurrentJob {
    pub job: Option<JobView>,
}

#[derive(Debug, Serialize)]
pub struct BatchView {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub locked: bool,
    pub tags: Vec<String>,
}
