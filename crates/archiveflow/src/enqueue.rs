use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

use crate::store::{self, batches, jobs, repeats, urls};

/// Longest accepted URL string; matches the column bound.
pub const MAX_URL_LEN: usize = 10_000;

/// Submissions above this size are split into multiple batches.
pub const BATCH_PARTITION_SIZE: usize = 30_000;

/// Captures every `interval` seconds; the default allows seven per day.
pub const DEFAULT_REPEAT_INTERVAL: i64 = 4 * 3600;

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("no urls provided")]
    NoUrls,
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// A one-shot submission of URLs to archive.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub urls: Vec<String>,
    pub priority: i32,
    pub unique_only: bool,
    pub tags: Vec<String>,
}

impl Default for BatchRequest {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            priority: 0,
            unique_only: true,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchSubmission {
    /// When the submission was partitioned, the id of the last partition.
    pub batch_id: i64,
    pub job_count: i64,
}

#[derive(Clone)]
pub struct EnqueueService {
    pool: PgPool,
    partition_size: usize,
}

impl EnqueueService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            partition_size: BATCH_PARTITION_SIZE,
        }
    }

    pub fn with_partition_size(pool: PgPool, partition_size: usize) -> Self {
        Self {
            pool,
            partition_size,
        }
    }

    /// Create one batch (or several, for oversized submissions) and one job
    /// per input URL. Each partition is written in a single transaction.
    pub async fn submit_batch(&self, req: BatchRequest) -> Result<BatchSubmission, EnqueueError> {
        if req.urls.is_empty() {
            return Err(EnqueueError::NoUrls);
        }
        for url in &req.urls {
            validate_url(url)?;
        }

        let mut urls = req.urls;
        if req.unique_only {
            urls = dedup_preserving_order(urls);
        }

        let mut batch_id = 0;
        let mut job_count = 0i64;
        for partition in urls.chunks(self.partition_size) {
            let created = match self.insert_partition(partition, req.priority, &req.tags).await {
                // A concurrent writer may have raced us on urls or tags;
                // the transaction is safe to retry once.
                Err(EnqueueError::Store(e)) if store::is_conflict(&e) => {
                    self.insert_partition(partition, req.priority, &req.tags)
                        .await?
                }
                other => other?,
            };
            batch_id = created;
            job_count += partition.len() as i64;
        }

        info!(batch_id, job_count, "batch submitted");
        Ok(BatchSubmission {
            batch_id,
            job_count,
        })
    }

    async fn insert_partition(
        &self,
        urls: &[String],
        priority: i32,
        tags: &[String],
    ) -> Result<i64, EnqueueError> {
        let mut tx = self.pool.begin().await?;

        let batch_id = batches::create_in(&mut tx).await?;
        batches::tag_in(&mut tx, batch_id, tags).await?;

        let url_map = urls::upsert_all(&mut tx, urls).await?;
        let url_ids: Vec<i64> = urls.iter().map(|u| url_map[u]).collect();

        let job_ids = jobs::insert_many_in(&mut tx, &url_ids, priority).await?;
        batches::link_jobs_in(&mut tx, batch_id, &job_ids).await?;

        tx.commit().await?;
        Ok(batch_id)
    }

    /// Create a standing repeat declaration, or update the existing one for
    /// this URL in place: re-declaring resets the interval and re-activates.
    pub async fn declare_repeat(&self, url: &str, interval: i64) -> Result<i64, EnqueueError> {
        validate_url(url)?;

        match self.upsert_repeat(url, interval).await {
            Err(EnqueueError::Store(e)) if store::is_conflict(&e) => {
                self.upsert_repeat(url, interval).await
            }
            other => other,
        }
    }

    async fn upsert_repeat(&self, url: &str, interval: i64) -> Result<i64, EnqueueError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT r.id
            FROM repeat_urls r
            JOIN urls u ON u.id = r.url_id
            WHERE u.url = $1
            "#,
        )
        .bind(url)
        .fetch_optional(&mut *tx)
        .await?;

        let repeat_id = match existing {
            Some(id) => {
                sqlx::query("UPDATE repeat_urls SET interval = $2, active_since = $3 WHERE id = $1")
                    .bind(id)
                    .bind(interval)
                    .bind(Utc::now())
                    .execute(&mut *tx)
                    .await?;
                id
            }
            None => {
                let url_map = urls::upsert_all(&mut tx, &[url.to_string()]).await?;
                let url_id = url_map[url];
                let batch_id = batches::create_in(&mut tx).await?;
                repeats::insert_in(&mut tx, url_id, batch_id, interval).await?
            }
        };

        tx.commit().await?;
        info!(repeat_id, url, interval, "repeat url declared");
        Ok(repeat_id)
    }
}

fn validate_url(raw: &str) -> Result<(), EnqueueError> {
    if raw.trim().is_empty() {
        return Err(EnqueueError::InvalidUrl {
            url: raw.to_string(),
            reason: "empty".to_string(),
        });
    }
    if raw.len() > MAX_URL_LEN {
        return Err(EnqueueError::InvalidUrl {
            url: raw.chars().take(80).collect(),
            reason: format!("longer than {MAX_URL_LEN} bytes"),
        });
    }
    if let Err(e) = url::Url::parse(raw) {
        return Err(EnqueueError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        });
    }
    Ok(())
}

fn dedup_preserving_order(urls: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::with_capacity(urls.len());
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_urls() {
        assert!(validate_url("https://example.com/page").is_ok());
        assert!(matches!(
            validate_url(""),
            Err(EnqueueError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_url("not a url"),
            Err(EnqueueError::InvalidUrl { .. })
        ));
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LEN));
        assert!(matches!(
            validate_url(&long),
            Err(EnqueueError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let urls = vec![
            "https://a.example".to_string(),
            "https://b.example".to_string(),
            "https://a.example".to_string(),
        ];
        assert_eq!(
            dedup_preserving_order(urls),
            vec!["https://a.example", "https://b.example"]
        );
    }
}
