use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::Capture;
use crate::store::jobs::{JobsRepo, MAX_RETRY};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Minimum interval between two captures of the same URL.
    pub min_interval: chrono::Duration,
    /// Capture attempts per round before the job is requeued or failed.
    pub attempts: u32,
    /// First backoff delay; doubles after every failed attempt.
    pub backoff_base: Duration,
    /// Sleep when the queue is empty.
    pub idle_sleep: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            min_interval: chrono::Duration::hours(1),
            attempts: 5,
            backoff_base: Duration::from_secs(10),
            idle_sleep: Duration::from_secs(1),
        }
    }
}

pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt)
}

/// What one scheduler iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// No runnable job.
    Idle,
    /// Shutdown was observed during a backoff sleep; the job stays pending
    /// with no state written.
    Cancelled,
    /// The job's URL is still in cooldown; no capture was attempted.
    Deferred { job_id: i64, until: DateTime<Utc> },
    Completed { job_id: i64, captured_at: DateTime<Utc> },
    /// Every attempt of this round failed; the job waits out the cooldown.
    Requeued { job_id: i64, retry: i32 },
    Failed { job_id: i64 },
}

/// Single-consumer scheduler: picks the highest-ranked runnable job, enforces
/// the per-URL cooldown, and drives one round of capture attempts to a
/// committed outcome.
pub struct UrlWorker<C> {
    jobs: JobsRepo,
    capture: C,
    cfg: WorkerConfig,
}

impl<C: Capture> UrlWorker<C> {
    pub fn new(jobs: JobsRepo, capture: C, cfg: WorkerConfig) -> Self {
        Self { jobs, capture, cfg }
    }

    /// Loop until cancelled. Store errors abort the loop and surface to the
    /// supervisor; capture errors only consume attempts.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!("url worker starting");

        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.run_once(&shutdown) => res?,
            };

            match outcome {
                WorkOutcome::Cancelled => break,
                WorkOutcome::Idle => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.cfg.idle_sleep) => {}
                    }
                }
                _ => {}
            }
        }

        info!("url worker stopped");
        Ok(())
    }

    pub async fn run_once(&self, shutdown: &CancellationToken) -> anyhow::Result<WorkOutcome> {
        let now = Utc::now();

        let Some(job) = self.jobs.next_runnable(now).await? else {
            return Ok(WorkOutcome::Idle);
        };

        // Cooldown gate: one capture per URL per min_interval. The job is
        // pushed to the earliest permissible instant instead of being run.
        if let Some(last_seen) = job.last_seen {
            let until = last_seen + self.cfg.min_interval;
            if until > now {
                self.jobs.defer(job.id, until).await?;
                info!(job_id = job.id, url = %job.url, %until, "url in cooldown, deferring job");
                return Ok(WorkOutcome::Deferred {
                    job_id: job.id,
                    until,
                });
            }
        }

        for attempt in 0..self.cfg.attempts {
            match self.capture.capture(&job.url).await {
                Ok(captured_at) => {
                    self.jobs.complete(job.id, job.url_id, captured_at).await?;
                    info!(job_id = job.id, url = %job.url, %captured_at, "capture committed");
                    return Ok(WorkOutcome::Completed {
                        job_id: job.id,
                        captured_at,
                    });
                }
                Err(err) => {
                    warn!(job_id = job.id, url = %job.url, attempt, error = %err, "capture attempt failed");
                    // The backoff sleep is a suspension point: shutdown must
                    // be observed here, leaving the job pending and untouched.
                    if attempt + 1 < self.cfg.attempts {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                info!(job_id = job.id, "shutdown during backoff, leaving job pending");
                                return Ok(WorkOutcome::Cancelled);
                            }
                            _ = tokio::time::sleep(backoff_delay(self.cfg.backoff_base, attempt)) => {}
                        }
                    }
                }
            }
        }

        if job.retry < MAX_RETRY {
            let until = now + self.cfg.min_interval;
            self.jobs.requeue(job.id, until).await?;
            info!(job_id = job.id, retry = job.retry + 1, %until, "attempts exhausted, requeueing");
            Ok(WorkOutcome::Requeued {
                job_id: job.id,
                retry: job.retry + 1,
            })
        } else {
            self.jobs.fail(job.id, now).await?;
            warn!(job_id = job.id, url = %job.url, "retries exhausted, job failed");
            Ok(WorkOutcome::Failed { job_id: job.id })
        }
    }
}
