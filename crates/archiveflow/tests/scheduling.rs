mod common;

use archiveflow::store::JobsRepo;
use chrono::{Duration, Utc};
use common::{insert_job, insert_url, setup_db};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn selection_orders_by_priority_retry_then_id() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let now = Utc::now();

    let url_id = insert_url(&pool, "https://a.example/", None).await;
    let low = insert_job(&pool, url_id, 0, 0).await;
    let fresh = insert_job(&pool, url_id, 5, 0).await;
    let retried = insert_job(&pool, url_id, 5, 2).await;
    let retried_later = insert_job(&pool, url_id, 5, 2).await;

    // Highest priority first; among equals, the most-retried; then insertion
    // order.
    let expected = [retried, retried_later, fresh, low];
    for want in expected {
        let picked = jobs.next_runnable(now).await.unwrap().unwrap();
        assert_eq!(picked.id, want);
        jobs.fail(picked.id, now).await.unwrap();
    }

    assert!(jobs.next_runnable(now).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn delay_boundary_is_inclusive() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let now = Utc::now();

    let url_id = insert_url(&pool, "https://a.example/", None).await;
    let job_id = insert_job(&pool, url_id, 0, 0).await;
    jobs.defer(job_id, now).await.unwrap();

    // delayed_until == now is runnable; one millisecond later is not.
    assert!(jobs
        .next_runnable(now - Duration::milliseconds(1))
        .await
        .unwrap()
        .is_none());
    let picked = jobs.next_runnable(now).await.unwrap().unwrap();
    assert_eq!(picked.id, job_id);
}

#[tokio::test]
#[serial]
async fn terminal_jobs_are_never_selected() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let now = Utc::now();

    let url_id = insert_url(&pool, "https://a.example/", None).await;
    let done = insert_job(&pool, url_id, 0, 0).await;
    let dead = insert_job(&pool, url_id, 0, 0).await;
    jobs.complete(done, url_id, now).await.unwrap();
    jobs.fail(dead, now).await.unwrap();

    assert!(jobs.next_runnable(now).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn peek_does_not_consume_the_job() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let now = Utc::now();

    let url_id = insert_url(&pool, "https://a.example/", None).await;
    let job_id = insert_job(&pool, url_id, 0, 0).await;

    let first = jobs.peek_next(now).await.unwrap().unwrap();
    let second = jobs.peek_next(now).await.unwrap().unwrap();
    assert_eq!(first.id, job_id);
    assert_eq!(second.id, job_id);
}

#[tokio::test]
#[serial]
async fn completion_also_advances_the_urls_last_seen() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let now = Utc::now();

    let url_id = insert_url(&pool, "https://a.example/", None).await;
    let job_id = insert_job(&pool, url_id, 0, 0).await;

    jobs.complete(job_id, url_id, now).await.unwrap();

    let (completed, failed, delayed): (
        Option<chrono::DateTime<Utc>>,
        Option<chrono::DateTime<Utc>>,
        Option<chrono::DateTime<Utc>>,
    ) = sqlx::query_as("SELECT completed, failed, delayed_until FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let last_seen: Option<chrono::DateTime<Utc>> =
        sqlx::query_scalar("SELECT last_seen FROM urls WHERE id = $1")
            .bind(url_id)
            .fetch_one(&pool)
            .await
            .unwrap();

    assert!(completed.is_some());
    assert!(failed.is_none());
    assert!(delayed.is_none());
    assert_eq!(last_seen, completed);
}
