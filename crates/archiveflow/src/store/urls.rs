use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::store::model::Url;

/// Insert any missing URL rows, then re-select the whole input set.
///
/// The re-select is required: a bulk insert does not return ids for rows that
/// already existed. Returns the full `url -> id` map for the input.
pub async fn upsert_all(
    conn: &mut PgConnection,
    urls: &[String],
) -> Result<HashMap<String, i64>, sqlx::Error> {
    if urls.is_empty() {
        return Ok(HashMap::new());
    }

    sqlx::query(
        r#"
        INSERT INTO urls (url)
        SELECT DISTINCT u FROM unnest($1::text[]) AS t(u)
        ON CONFLICT (url) DO NOTHING
        "#,
    )
    .bind(urls)
    .execute(&mut *conn)
    .await?;

    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT url, id
        FROM urls
        WHERE url = ANY($1)
        "#,
    )
    .bind(urls)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().collect())
}

#[derive(Clone)]
pub struct UrlsRepo {
    pool: PgPool,
}

impl UrlsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_ids(&self, ids: &[i64]) -> anyhow::Result<HashMap<i64, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (i64, String)>("SELECT id, url FROM urls WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn get_by_url(&self, url: &str) -> anyhow::Result<Option<Url>> {
        let row = sqlx::query_as::<_, Url>("SELECT * FROM urls WHERE url = $1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Page of URL rows ordered by id; `after` filters on `first_seen`.
    pub async fn list(
        &self,
        page: i64,
        per_page: i64,
        after: Option<DateTime<Utc>>,
        desc: bool,
    ) -> anyhow::Result<(Vec<Url>, i64)> {
        let total: i64 = match after {
            Some(after) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM urls WHERE first_seen > $1")
                    .bind(after)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM urls")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        let order = if desc { "DESC" } else { "ASC" };
        let sql = match after {
            Some(_) => format!(
                "SELECT * FROM urls WHERE first_seen > $3 ORDER BY id {order} OFFSET $1 LIMIT $2"
            ),
            None => format!("SELECT * FROM urls ORDER BY id {order} OFFSET $1 LIMIT $2"),
        };

        let mut query = sqlx::query_as::<_, Url>(&sql)
            .bind((page - 1) * per_page)
            .bind(per_page);
        if let Some(after) = after {
            query = query.bind(after);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok((rows, total))
    }
}
