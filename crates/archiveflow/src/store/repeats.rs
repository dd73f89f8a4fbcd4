use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::store::model::{DueRepeat, RepeatUrl};

pub async fn insert_in(
    conn: &mut PgConnection,
    url_id: i64,
    batch_id: i64,
    interval: i64,
) -> Result<i64, sqlx::Error> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO repeat_urls (url_id, batch_id, interval) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(url_id)
    .bind(batch_id)
    .bind(interval)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

#[derive(Clone)]
pub struct RepeatsRepo {
    pool: PgPool,
}

impl RepeatsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> anyhow::Result<Option<RepeatUrl>> {
        let row = sqlx::query_as::<_, RepeatUrl>("SELECT * FROM repeat_urls WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn find_by_url(&self, url: &str) -> anyhow::Result<Option<RepeatUrl>> {
        let row = sqlx::query_as::<_, RepeatUrl>(
            r#"
            SELECT r.*
            FROM repeat_urls r
            JOIN urls u ON u.id = r.url_id
            WHERE u.url = $1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Repeaters whose activation instant has passed, with their URL state,
    /// ordered by id.
    pub async fn due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<DueRepeat>> {
        let rows = sqlx::query_as::<_, DueRepeat>(
            r#"
            SELECT r.id, r.url_id, r.batch_id, r.interval, u.url, u.last_seen
            FROM repeat_urls r
            JOIN urls u ON u.id = r.url_id
            WHERE r.active_since IS NOT NULL AND r.active_since <= $1
            ORDER BY r.id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Subset of `urls` that currently own at least one non-terminal job.
    pub async fn in_flight_urls(&self, urls: &[String]) -> anyhow::Result<Vec<String>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT u.url
            FROM urls u
            JOIN jobs j ON j.url_id = u.id
            WHERE u.url = ANY($1)
              AND j.completed IS NULL
              AND j.failed IS NULL
            "#,
        )
        .bind(urls)
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
    ) -> anyhow::Result<(Vec<RepeatUrl>, i64)> {
        let total: i64 = match after {
            Some(after) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM repeat_urls WHERE created_at > $1")
                    .bind(after)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM repeat_urls")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        let order = if desc { "DESC" } else { "ASC" };
        let sql = match after {
            Some(_) => format!(
                "SELECT * FROM repeat_urls WHERE created_at > $3 ORDER BY id {order} OFFSET $1 LIMIT $2"
            ),
            None => format!("SELECT * FROM repeat_urls ORDER BY id {order} OFFSET $1 LIMIT $2"),
        };

        let mut query = sqlx::query_as::<_, RepeatUrl>(&sql)
            .bind((page - 1) * per_page)
            .bind(per_page);
        if let Some(after) = after {
            query = query.bind(after);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok((rows, total))
    }
}
