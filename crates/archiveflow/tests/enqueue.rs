mod common;

use archiveflow::enqueue::{BatchRequest, EnqueueError, EnqueueService};
use archiveflow::store::{BatchesRepo, RepeatsRepo};
use common::setup_db;
use serial_test::serial;
use sqlx::PgPool;

fn request(urls: &[&str]) -> BatchRequest {
    BatchRequest {
        urls: urls.iter().map(|u| u.to_string()).collect(),
        ..BatchRequest::default()
    }
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
#[serial]
async fn unique_only_collapses_duplicate_urls() {
    let pool = setup_db().await;
    let enqueue = EnqueueService::new(pool.clone());

    let submission = enqueue
        .submit_batch(request(&[
            "https://a.example/page",
            "https://b.example/page",
            "https://a.example/page",
        ]))
        .await
        .unwrap();

    assert_eq!(submission.job_count, 2);
    assert_eq!(count(&pool, "urls").await, 2);
    assert_eq!(count(&pool, "jobs").await, 2);

    let linked: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM batch_jobs WHERE batch_id = $1")
        .bind(submission.batch_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(linked, 2);
}

#[tokio::test]
#[serial]
async fn duplicates_become_separate_jobs_for_one_url_row() {
    let pool = setup_db().await;
    let enqueue = EnqueueService::new(pool.clone());

    let submission = enqueue
        .submit_batch(BatchRequest {
            unique_only: false,
            ..request(&[
                "https://a.example/page",
                "https://b.example/page",
                "https://a.example/page",
            ])
        })
        .await
        .unwrap();

    assert_eq!(submission.job_count, 3);
    assert_eq!(count(&pool, "urls").await, 2);
    assert_eq!(count(&pool, "jobs").await, 3);

    let jobs_for_a: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM jobs j JOIN urls u ON u.id = j.url_id WHERE u.url = $1",
    )
    .bind("https://a.example/page")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(jobs_for_a, 2);
}

#[tokio::test]
#[serial]
async fn resubmission_reuses_url_rows() {
    let pool = setup_db().await;
    let enqueue = EnqueueService::new(pool.clone());

    enqueue
        .submit_batch(request(&["https://a.example/", "https://b.example/"]))
        .await
        .unwrap();
    enqueue
        .submit_batch(request(&["https://a.example/", "https://c.example/"]))
        .await
        .unwrap();

    assert_eq!(count(&pool, "urls").await, 3);
    assert_eq!(count(&pool, "jobs").await, 4);
    assert_eq!(count(&pool, "batches").await, 2);
}

#[tokio::test]
#[serial]
async fn invalid_input_is_rejected_before_any_write() {
    let pool = setup_db().await;
    let enqueue = EnqueueService::new(pool.clone());

    assert!(matches!(
        enqueue.submit_batch(request(&[])).await,
        Err(EnqueueError::NoUrls)
    ));
    assert!(matches!(
        enqueue.submit_batch(request(&[""])).await,
        Err(EnqueueError::InvalidUrl { .. })
    ));
    assert!(matches!(
        enqueue
            .submit_batch(request(&["https://ok.example/", "not a url"]))
            .await,
        Err(EnqueueError::InvalidUrl { .. })
    ));

    assert_eq!(count(&pool, "urls").await, 0);
    assert_eq!(count(&pool, "jobs").await, 0);
    assert_eq!(count(&pool, "batches").await, 0);
}

#[tokio::test]
#[serial]
async fn oversized_submissions_are_partitioned() {
    let pool = setup_db().await;
    let enqueue = EnqueueService::with_partition_size(pool.clone(), 2);

    let submission = enqueue
        .submit_batch(request(&[
            "https://a.example/",
            "https://b.example/",
            "https://c.example/",
            "https://d.example/",
            "https://e.example/",
        ]))
        .await
        .unwrap();

    assert_eq!(submission.job_count, 5);
    assert_eq!(count(&pool, "batches").await, 3);
    assert_eq!(count(&pool, "jobs").await, 5);
    assert_eq!(count(&pool, "batch_jobs").await, 5);

    // The reported id is the last partition created.
    let max_batch: i64 = sqlx::query_scalar("SELECT MAX(id) FROM batches")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(submission.batch_id, max_batch);
}

#[tokio::test]
#[serial]
async fn tags_are_deduped_across_batches() {
    let pool = setup_db().await;
    let enqueue = EnqueueService::new(pool.clone());
    let batches = BatchesRepo::new(pool.clone());

    let first = enqueue
        .submit_batch(BatchRequest {
            tags: vec!["news".to_string(), "daily".to_string()],
            ..request(&["https://a.example/"])
        })
        .await
        .unwrap();
    let second = enqueue
        .submit_batch(BatchRequest {
            tags: vec!["news".to_string(), "weekly".to_string()],
            ..request(&["https://b.example/"])
        })
        .await
        .unwrap();

    assert_eq!(count(&pool, "batch_tags").await, 3);
    assert_eq!(
        batches.tags_of(first.batch_id).await.unwrap(),
        vec!["daily", "news"]
    );
    assert_eq!(
        batches.tags_of(second.batch_id).await.unwrap(),
        vec!["news", "weekly"]
    );
}

#[tokio::test]
#[serial]
async fn declare_repeat_creates_url_and_lineage_batch() {
    let pool = setup_db().await;
    let enqueue = EnqueueService::new(pool.clone());
    let repeats = RepeatsRepo::new(pool.clone());

    let repeat_id = enqueue
        .declare_repeat("https://r.example/feed", 7200)
        .await
        .unwrap();

    let repeat = repeats
        .find_by_url("https://r.example/feed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repeat.id, repeat_id);
    assert_eq!(repeat.interval, 7200);
    assert!(repeat.active_since.is_some());

    assert_eq!(count(&pool, "urls").await, 1);
    assert_eq!(count(&pool, "batches").await, 1);
}

#[tokio::test]
#[serial]
async fn redeclare_updates_in_place_and_reactivates() {
    let pool = setup_db().await;
    let enqueue = EnqueueService::new(pool.clone());
    let repeats = RepeatsRepo::new(pool.clone());

    let first = enqueue
        .declare_repeat("https://r.example/feed", 7200)
        .await
        .unwrap();

    // Disable, then re-declare with a new interval.
    sqlx::query("UPDATE repeat_urls SET active_since = NULL WHERE id = $1")
        .bind(first)
        .execute(&pool)
        .await
        .unwrap();

    let second = enqueue
        .declare_repeat("https://r.example/feed", 600)
        .await
        .unwrap();
    assert_eq!(first, second);

    let repeat = repeats.get(first).await.unwrap().unwrap();
    assert_eq!(repeat.interval, 600);
    assert!(repeat.active_since.is_some());

    // Still one repeater, one lineage batch, one url row.
    assert_eq!(count(&pool, "repeat_urls").await, 1);
    assert_eq!(count(&pool, "batches").await, 1);
    assert_eq!(count(&pool, "urls").await, 1);
}
