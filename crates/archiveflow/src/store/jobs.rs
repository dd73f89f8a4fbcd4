use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use crate::store::model::{ClaimedJob, Job};

/// Retries are capped; a job that exhausts its attempts at this count fails
/// permanently instead of requeueing.
pub const MAX_RETRY: i32 = 4;

pub async fn insert_in(
    conn: &mut PgConnection,
    url_id: i64,
    priority: i32,
) -> Result<i64, sqlx::Error> {
    let id: i64 =
        sqlx::query_scalar("INSERT INTO jobs (url_id, priority) VALUES ($1, $2) RETURNING id")
            .bind(url_id)
            .bind(priority)
            .fetch_one(conn)
            .await?;
    Ok(id)
}

/// Insert one job per url id in a single round-trip, preserving input order.
pub async fn insert_many_in(
    conn: &mut PgConnection,
    url_ids: &[i64],
    priority: i32,
) -> Result<Vec<i64>, sqlx::Error> {
    if url_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO jobs (url_id, priority)
        SELECT u, $2 FROM unnest($1::bigint[]) AS t(u)
        RETURNING id
        "#,
    )
    .bind(url_ids)
    .bind(priority)
    .fetch_all(conn)
    .await?;
    Ok(ids)
}

/// Filters for job listings. The four state flags select which logical states
/// are included; when they are all equal no state filter is applied.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub not_started: bool,
    pub completed: bool,
    pub delayed: bool,
    pub failed: bool,
    pub retries_less_than: Option<i32>,
    pub retries_greater_than: Option<i32>,
    pub retries_equal_to: Option<i32>,
    pub after: Option<DateTime<Utc>>,
    pub batch_id: Option<i64>,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            not_started: true,
            completed: true,
            delayed: true,
            failed: true,
            retries_less_than: None,
            retries_greater_than: None,
            retries_equal_to: None,
            after: None,
            batch_id: None,
        }
    }
}

fn push_filter(qb: &mut QueryBuilder<Postgres>, filter: &JobFilter) {
    qb.push(" WHERE TRUE");

    if let Some(batch_id) = filter.batch_id {
        qb.push(" AND id IN (SELECT job_id FROM batch_jobs WHERE batch_id = ");
        qb.push_bind(batch_id);
        qb.push(")");
    }

    let flags = [
        filter.not_started,
        filter.completed,
        filter.delayed,
        filter.failed,
    ];
    if flags.iter().any(|f| *f != flags[0]) {
        let mut states: Vec<&str> = Vec::new();
        if filter.not_started {
            states.push("(completed IS NULL AND failed IS NULL AND delayed_until IS NULL)");
        }
        if filter.completed {
            states.push("completed IS NOT NULL");
        }
        if filter.delayed {
            states.push("delayed_until IS NOT NULL");
        }
        if filter.failed {
            states.push("failed IS NOT NULL");
        }
        if states.is_empty() {
            qb.push(" AND FALSE");
        } else {
            qb.push(" AND (");
            qb.push(states.join(" OR "));
            qb.push(")");
        }
    }

    if let Some(n) = filter.retries_less_than {
        qb.push(" AND retry < ");
        qb.push_bind(n);
    }
    if let Some(n) = filter.retries_greater_than {
        qb.push(" AND retry > ");
        qb.push_bind(n);
    }
    if let Some(n) = filter.retries_equal_to {
        qb.push(" AND retry = ");
        qb.push_bind(n);
    }

    if let Some(after) = filter.after {
        qb.push(" AND created_at > ");
        qb.push_bind(after);
    }
}

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Scheduler
    // ----------------------------

    /// Select the next runnable job along with its URL.
    ///
    /// Ordering: priority first, then jobs that have already suffered retries
    /// (so near-failing work is not starved by fresh arrivals), then insertion
    /// order. SKIP LOCKED only keeps concurrent pickers from blocking on the
    /// head row during selection; the lock ends at commit with no claim
    /// marker written, so exactly one worker is assumed to drive jobs to
    /// their outcomes.
    pub async fn next_runnable(&self, now: DateTime<Utc>) -> anyhow::Result<Option<ClaimedJob>> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, ClaimedJob>(
            r#"
            SELECT j.id, j.url_id, u.url, j.priority, j.retry, u.last_seen
            FROM jobs j
            JOIN urls u ON u.id = j.url_id
            WHERE j.completed IS NULL
              AND j.failed IS NULL
              AND (j.delayed_until IS NULL OR j.delayed_until <= $1)
            ORDER BY j.priority DESC, j.retry DESC, j.id ASC
            LIMIT 1
            FOR UPDATE OF j SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    /// Read-only view of the job the worker would pick next.
    pub async fn peek_next(&self, now: DateTime<Utc>) -> anyhow::Result<Option<ClaimedJob>> {
        let job = sqlx::query_as::<_, ClaimedJob>(
            r#"
            SELECT j.id, j.url_id, u.url, j.priority, j.retry, u.last_seen
            FROM jobs j
            JOIN urls u ON u.id = j.url_id
            WHERE j.completed IS NULL
              AND j.failed IS NULL
              AND (j.delayed_until IS NULL OR j.delayed_until <= $1)
            ORDER BY j.priority DESC, j.retry DESC, j.id ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    /// Push the job past the per-URL cooldown without consuming an attempt.
    pub async fn defer(&self, job_id: i64, until: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE jobs SET delayed_until = $2 WHERE id = $1")
            .bind(job_id)
            .bind(until)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Commit a successful capture: the job completes and its URL's
    /// `last_seen` advances to the capture time, in one transaction.
    pub async fn complete(
        &self,
        job_id: i64,
        url_id: i64,
        captured_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE urls SET last_seen = $2 WHERE id = $1")
            .bind(url_id)
            .bind(captured_at)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE jobs SET completed = $2, failed = NULL, delayed_until = NULL WHERE id = $1",
        )
        .bind(job_id)
        .bind(captured_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// All attempts of one round failed but the job has retries left.
    pub async fn requeue(&self, job_id: i64, delayed_until: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE jobs SET retry = retry + 1, delayed_until = $2 WHERE id = $1")
            .bind(job_id)
            .bind(delayed_until)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Terminal failure after the last retry round.
    pub async fn fail(&self, job_id: i64, failed_at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE jobs SET failed = $2, delayed_until = NULL WHERE id = $1")
            .bind(job_id)
            .bind(failed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get(&self, job_id: i64) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn list(
        &self,
        filter: &JobFilter,
        page: i64,
        per_page: i64,
        desc: bool,
    ) -> anyhow::Result<(Vec<Job>, i64)> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM jobs");
        push_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new("SELECT * FROM jobs");
        push_filter(&mut qb, filter);
        qb.push(if desc { " ORDER BY id DESC" } else { " ORDER BY id ASC" });
        qb.push(" OFFSET ");
        qb.push_bind((page - 1) * per_page);
        qb.push(" LIMIT ");
        qb.push_bind(per_page);

        let rows = qb.build_query_as::<Job>().fetch_all(&self.pool).await?;
        Ok((rows, total))
    }
}
