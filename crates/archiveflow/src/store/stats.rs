use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;

/// Job counts per retry round.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryCounts {
    pub r0: i64,
    pub r1: i64,
    pub r2: i64,
    pub r3: i64,
    pub r4: i64,
    pub total: i64,
}

impl RetryCounts {
    fn from_rows(rows: &[(i32, i64)]) -> Self {
        let mut counts = Self::default();
        for (retry, n) in rows {
            match retry {
                0 => counts.r0 = *n,
                1 => counts.r1 = *n,
                2 => counts.r2 = *n,
                3 => counts.r3 = *n,
                _ => counts.r4 = *n,
            }
            counts.total += n;
        }
        counts
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub not_done: RetryCounts,
    pub completed: RetryCounts,
    pub failed: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlStats {
    pub super_recently_archived: i64,
    pub recently_archived: i64,
    pub not_recently_archived: i64,
    pub total_archived: i64,
    pub not_archived: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepeatStats {
    pub active: i64,
    pub inactive: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub jobs: JobStats,
    pub batches: i64,
    pub urls: UrlStats,
    pub repeat_urls: RepeatStats,
}

#[derive(Clone)]
pub struct StatsRepo {
    pool: PgPool,
    min_interval: Duration,
}

impl StatsRepo {
    pub fn new(pool: PgPool, min_interval: Duration) -> Self {
        Self { pool, min_interval }
    }

    pub async fn snapshot(&self) -> anyhow::Result<Stats> {
        let now = Utc::now();

        let not_done: Vec<(i32, i64)> = sqlx::query_as(
            r#"
            SELECT retry, COUNT(*)
            FROM jobs
            WHERE completed IS NULL AND failed IS NULL
            GROUP BY retry
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let completed: Vec<(i32, i64)> = sqlx::query_as(
            r#"
            SELECT retry, COUNT(*)
            FROM jobs
            WHERE completed IS NOT NULL
            GROUP BY retry
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let failed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE failed IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        let batches: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batches")
            .fetch_one(&self.pool)
            .await?;

        // "Super recently" means inside the per-URL cooldown; "recently" means
        // inside the default repeat interval of four hours.
        let super_recent: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM urls WHERE last_seen > $1")
                .bind(now - self.min_interval)
                .fetch_one(&self.pool)
                .await?;

        let recent: i64 = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM urls WHERE last_seen > $1",
        )
        .bind(now - Duration::hours(4))
        .fetch_one(&self.pool)
        .await?
            - super_recent;

        let not_recent: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM urls WHERE last_seen < $1")
            .bind(now - Duration::hours(4))
            .fetch_one(&self.pool)
            .await?;

        let not_archived: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM urls WHERE last_seen IS NULL")
                .fetch_one(&self.pool)
                .await?;

        let active_repeats: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM repeat_urls WHERE active_since IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;

        let inactive_repeats: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM repeat_urls WHERE active_since IS NULL")
                .fetch_one(&self.pool)
                .await?;

        let not_done = RetryCounts::from_rows(&not_done);
        let completed = RetryCounts::from_rows(&completed);
        let total_archived = super_recent + recent + not_recent;

        Ok(Stats {
            jobs: JobStats {
                total: not_done.total + completed.total + failed,
                not_done,
                completed,
                failed,
            },
            batches,
            urls: UrlStats {
                super_recently_archived: super_recent,
                recently_archived: recent,
                not_recently_archived: not_recent,
                total_archived,
                not_archived,
                total: total_archived + not_archived,
            },
            repeat_urls: RepeatStats {
                active: active_repeats,
                inactive: inactive_repeats,
                total: active_repeats + inactive_repeats,
            },
        })
    }
}
