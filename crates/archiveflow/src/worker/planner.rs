use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::store::model::DueRepeat;
use crate::store::{batches, jobs, RepeatsRepo};

/// Jobs materialized from repeaters outrank ordinary submissions.
pub const REPEAT_PRIORITY: i32 = 10;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Time between expansion passes.
    pub period: Duration,
    /// All expansions inside this window share one meta-batch.
    pub meta_batch_window: chrono::Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            meta_batch_window: chrono::Duration::minutes(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MetaBatch {
    batch_id: i64,
    created_at: DateTime<Utc>,
}

/// Periodic loop that materializes jobs for active repeat URLs, grouping each
/// window of expansions into a shared meta-batch on top of every repeater's
/// own lineage batch.
pub struct RepeatPlanner {
    pool: PgPool,
    repeats: RepeatsRepo,
    cfg: PlannerConfig,
    meta: Option<MetaBatch>,
}

impl RepeatPlanner {
    pub fn new(pool: PgPool, cfg: PlannerConfig) -> Self {
        let repeats = RepeatsRepo::new(pool.clone());
        Self {
            pool,
            repeats,
            cfg,
            meta: None,
        }
    }

    /// Loop until cancelled. A failed tick rolls its expansion back and
    /// aborts the loop; the error surfaces to the supervisor.
    pub async fn run(&mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!("repeat planner starting");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                res = self.tick() => {
                    let created = res?;
                    if created > 0 {
                        info!(jobs = created, "expanded repeat urls");
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.cfg.period) => {}
            }
        }

        info!("repeat planner stopped");
        Ok(())
    }

    pub async fn tick(&mut self) -> anyhow::Result<usize> {
        self.tick_at(Utc::now()).await
    }

    /// One expansion pass as of `now`. Returns the number of jobs created.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let due = self.repeats.due(now).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let candidates: Vec<String> = due.iter().map(|r| r.url.clone()).collect();
        let in_flight: HashSet<String> =
            self.repeats.in_flight_urls(&candidates).await?.into_iter().collect();

        let eligible: Vec<&DueRepeat> = due
            .iter()
            .filter(|r| is_due(r, now) && !in_flight.contains(&r.url))
            .collect();
        if eligible.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let meta = match self.meta {
            Some(meta) if meta.created_at + self.cfg.meta_batch_window >= now => meta,
            _ => MetaBatch {
                batch_id: batches::create_in(&mut tx).await?,
                created_at: now,
            },
        };

        for repeat in &eligible {
            let job_id = jobs::insert_in(&mut tx, repeat.url_id, REPEAT_PRIORITY).await?;
            batches::link_job_in(&mut tx, meta.batch_id, job_id).await?;
            batches::link_job_in(&mut tx, repeat.batch_id, job_id).await?;
        }

        tx.commit().await?;

        // Only adopt a fresh meta-batch once its first jobs have committed.
        self.meta = Some(meta);
        Ok(eligible.len())
    }
}

/// A repeater is due when its URL has never been captured or the last capture
/// is older than its interval. In-flight dedup is applied separately.
fn is_due(repeat: &DueRepeat, now: DateTime<Utc>) -> bool {
    match repeat.last_seen {
        None => true,
        Some(last_seen) => last_seen + chrono::Duration::seconds(repeat.interval) < now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn repeat(last_seen: Option<DateTime<Utc>>, interval: i64) -> DueRepeat {
        DueRepeat {
            id: 1,
            url_id: 1,
            batch_id: 1,
            interval,
            url: "https://example.com".to_string(),
            last_seen,
        }
    }

    #[test]
    fn never_captured_is_due() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(is_due(&repeat(None, 3600), now));
    }

    #[test]
    fn due_only_after_interval_elapses() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let stale = now - chrono::Duration::seconds(3601);
        let fresh = now - chrono::Duration::seconds(3600);
        assert!(is_due(&repeat(Some(stale), 3600), now));
        assert!(!is_due(&repeat(Some(fresh), 3600), now));
    }
}
