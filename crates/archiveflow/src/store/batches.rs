use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::store::model::Batch;

pub async fn create_in(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    let id: i64 = sqlx::query_scalar("INSERT INTO batches DEFAULT VALUES RETURNING id")
        .fetch_one(conn)
        .await?;
    Ok(id)
}

pub async fn link_job_in(
    conn: &mut PgConnection,
    batch_id: i64,
    job_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO batch_jobs (batch_id, job_id) VALUES ($1, $2)")
        .bind(batch_id)
        .bind(job_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn link_jobs_in(
    conn: &mut PgConnection,
    batch_id: i64,
    job_ids: &[i64],
) -> Result<(), sqlx::Error> {
    if job_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO batch_jobs (batch_id, job_id)
        SELECT $1, j FROM unnest($2::bigint[]) AS t(j)
        "#,
    )
    .bind(batch_id)
    .bind(job_ids)
    .execute(conn)
    .await?;
    Ok(())
}

/// Resolve tag names to rows (inserting missing ones) and link them to the batch.
pub async fn tag_in(
    conn: &mut PgConnection,
    batch_id: i64,
    tags: &[String],
) -> Result<(), sqlx::Error> {
    if tags.is_empty() {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO batch_tags (name)
        SELECT DISTINCT n FROM unnest($1::text[]) AS t(n)
        ON CONFLICT (name) DO NOTHING
        "#,
    )
    .bind(tags)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO batch_tag_batches (batch_id, batch_tag_id)
        SELECT $1, id FROM batch_tags WHERE name = ANY($2)
        ON CONFLICT (batch_id, batch_tag_id) DO NOTHING
        "#,
    )
    .bind(batch_id)
    .bind(tags)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[derive(Clone)]
pub struct BatchesRepo {
    pool: PgPool,
}

impl BatchesRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> anyhow::Result<Option<Batch>> {
        let row = sqlx::query_as::<_, Batch>("SELECT * FROM batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn tags_of(&self, batch_id: i64) -> anyhow::Result<Vec<String>> {
        let tags = sqlx::query_scalar::<_, String>(
            r#"
            SELECT t.name
            FROM batch_tags t
            JOIN batch_tag_batches bt ON bt.batch_tag_id = t.id
            WHERE bt.batch_id = $1
            ORDER BY t.name
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tags)
    }

    /// Batch ids a job belongs to, in insertion order.
    pub async fn batches_of_job(&self, job_id: i64) -> anyhow::Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT batch_id FROM batch_jobs WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// `(job_id, batch_id)` pairs for a set of jobs, in link order.
    pub async fn links_for_jobs(&self, job_ids: &[i64]) -> anyhow::Result<Vec<(i64, i64)>> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT job_id, batch_id FROM batch_jobs WHERE job_id = ANY($1) ORDER BY id",
        )
        .bind(job_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list(
        &self,
        page: i64,
        per_page: i64,
        after: Option<DateTime<Utc>>,
        desc: bool,
    ) -> anyhow::Result<(Vec<Batch>, i64)> {
        let total: i64 = match after {
            Some(after) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM batches WHERE created_at > $1")
                    .bind(after)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM batches")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        let order = if desc { "DESC" } else { "ASC" };
        let sql = match after {
            Some(_) => format!(
                "SELECT * FROM batches WHERE created_at > $3 ORDER BY id {order} OFFSET $1 LIMIT $2"
            ),
            None => format!("SELECT * FROM batches ORDER BY id {order} OFFSET $1 LIMIT $2"),
        };

        let mut query = sqlx::query_as::<_, Batch>(&sql)
            .bind((page - 1) * per_page)
            .bind(per_page);
        if let Some(after) = after {
            query = query.bind(after);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok((rows, total))
    }
}
