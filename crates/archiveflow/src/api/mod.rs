use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use crate::api::models::{
    BatchView, CurrentJob, DeclareRepeatBody, JobListQuery, JobView, PageQuery, PaginationOutput,
    RepeatDeclared, SubmitBatchBody, MAX_PAGE, PER_PAGE,
};
use crate::enqueue::{BatchRequest, BatchSubmission, EnqueueError, EnqueueService};
use crate::store::jobs::JobFilter;
use crate::store::model::{Job, RepeatUrl, Url};
use crate::store::stats::Stats;
use crate::store::{BatchesRepo, JobsRepo, RepeatsRepo, StatsRepo, UrlsRepo};

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub enqueue: EnqueueService,
    pub jobs: JobsRepo,
    pub batches: BatchesRepo,
    pub urls: UrlsRepo,
    pub repeats: RepeatsRepo,
    pub stats: StatsRepo,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Enqueue
        .route("/queue/batch", post(queue_batch))
        .route("/queue/loop", post(queue_loop))
        // Inspect
        .route("/job", get(list_jobs))
        .route("/job/current", get(current_job))
        .route("/job/:id", get(get_job))
        .route("/batch", get(list_batches))
        .route("/batch/:id", get(get_batch))
        .route("/batch/:id/jobs", get(get_batch_jobs))
        .route("/repeat_url", get(list_repeat_urls))
        .route("/url", get(list_urls))
        .route("/stats", get(stats))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal_err(e: anyhow::Error) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal error: {e}"),
    )
}

fn enqueue_err(e: EnqueueError) -> ApiError {
    match e {
        EnqueueError::NoUrls | EnqueueError::InvalidUrl { .. } => {
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        EnqueueError::Store(e) => internal_err(e.into()),
    }
}

fn not_found(what: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("{what} not found"))
}

fn check_page(page: i64) -> Result<(), ApiError> {
    if (1..=MAX_PAGE).contains(&page) {
        Ok(())
    } else {
        Err((
            StatusCode::BAD_REQUEST,
            format!("page must be between 1 and {MAX_PAGE}"),
        ))
    }
}

// ----------------------------
// Enqueue
// ----------------------------

async fn queue_batch(
    State(state): State<ApiState>,
    Json(body): Json<SubmitBatchBody>,
) -> Result<Json<BatchSubmission>, ApiError> {
    let submission = state
        .enqueue
        .submit_batch(BatchRequest {
            urls: body.urls,
            priority: body.priority,
            unique_only: body.unique_only,
            tags: body.tags,
        })
        .await
        .map_err(enqueue_err)?;

    Ok(Json(submission))
}

async fn queue_loop(
    State(state): State<ApiState>,
    Json(body): Json<DeclareRepeatBody>,
) -> Result<Json<RepeatDeclared>, ApiError> {
    let repeat_id = state
        .enqueue
        .declare_repeat(&body.url, body.interval)
        .await
        .map_err(enqueue_err)?;

    Ok(Json(RepeatDeclared { repeat_id }))
}

// ----------------------------
// Jobs
// ----------------------------

/// Resolve URL strings and batch memberships for a page of jobs.
async fn job_views(state: &ApiState, jobs: Vec<Job>) -> anyhow::Result<Vec<JobView>> {
    let job_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
    let url_ids: Vec<i64> = jobs.iter().map(|j| j.url_id).collect();

    let urls = state.urls.by_ids(&url_ids).await?;
    let mut batches: HashMap<i64, Vec<i64>> = HashMap::new();
    for (job_id, batch_id) in state.batches.links_for_jobs(&job_ids).await? {
        batches.entry(job_id).or_default().push(batch_id);
    }

    Ok(jobs
        .iter()
        .map(|job| {
            JobView::from_job(
                job,
                urls.get(&job.url_id).cloned().unwrap_or_default(),
                batches.remove(&job.id).unwrap_or_default(),
            )
        })
        .collect())
}

fn job_filter(q: &JobListQuery, batch_id: Option<i64>) -> Result<JobFilter, ApiError> {
    let retry_filters = [
        q.retries_less_than,
        q.retries_greater_than,
        q.retries_equal_to,
    ];
    if retry_filters.iter().filter(|f| f.is_some()).count() > 1 {
        return Err((
            StatusCode::BAD_REQUEST,
            "provide only one of retries_less_than, retries_greater_than, or retries_equal_to"
                .to_string(),
        ));
    }

    Ok(JobFilter {
        not_started: q.not_started,
        completed: q.completed,
        delayed: q.delayed,
        failed: q.failed,
        retries_less_than: q.retries_less_than,
        retries_greater_than: q.retries_greater_than,
        retries_equal_to: q.retries_equal_to,
        after: q.after,
        batch_id,
    })
}

async fn list_jobs(
    State(state): State<ApiState>,
    Query(q): Query<JobListQuery>,
) -> Result<Json<PaginationOutput<JobView>>, ApiError> {
    check_page(q.page)?;
    let filter = job_filter(&q, None)?;

    let (jobs, total) = state
        .jobs
        .list(&filter, q.page, PER_PAGE, q.desc)
        .await
        .map_err(internal_err)?;
    let views = job_views(&state, jobs).await.map_err(internal_err)?;

    Ok(Json(PaginationOutput::new(views, q.page, total)))
}

async fn current_job(State(state): State<ApiState>) -> Result<Json<CurrentJob>, ApiError> {
    let Some(claimed) = state
        .jobs
        .peek_next(Utc::now())
        .await
        .map_err(internal_err)?
    else {
        return Ok(Json(CurrentJob { job: None }));
    };

    let job = state
        .jobs
        .get(claimed.id)
        .await
        .map_err(internal_err)?
        .ok_or_else(|| not_found("job"))?;
    let batches = state
        .batches
        .batches_of_job(job.id)
        .await
        .map_err(internal_err)?;

    Ok(Json(CurrentJob {
        job: Some(JobView::from_job(&job, claimed.url, batches)),
    }))
}

async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<i64>,
) -> Result<Json<JobView>, ApiError> {
    let job = state
        .jobs
        .get(job_id)
        .await
        .map_err(internal_err)?
        .ok_or_else(|| not_found("job"))?;

    let mut views = job_views(&state, vec![job]).await.map_err(internal_err)?;
    Ok(Json(views.remove(0)))
}

// ----------------------------
// Batches
// ----------------------------

async fn batch_view(state: &ApiState, batch_id: i64) -> Result<BatchView, ApiError> {
    let batch = state
        .batches
        .get(batch_id)
        .await
        .map_err(internal_err)?
        .ok_or_else(|| not_found("batch"))?;
    let tags = state
        .batches
        .tags_of(batch.id)
        .await
        .map_err(internal_err)?;

    Ok(BatchView {
        id: batch.id,
        created_at: batch.created_at,
        locked: batch.locked,
        tags,
    })
}

async fn list_batches(
    State(state): State<ApiState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<PaginationOutput<BatchView>>, ApiError> {
    check_page(q.page)?;

    let (batches, total) = state
        .batches
        .list(q.page, PER_PAGE, q.after, q.desc)
        .await
        .map_err(internal_err)?;

    let mut views = Vec::with_capacity(batches.len());
    for batch in &batches {
        let tags = state
            .batches
            .tags_of(batch.id)
            .await
            .map_err(internal_err)?;
        views.push(BatchView {
            id: batch.id,
            created_at: batch.created_at,
            locked: batch.locked,
            tags,
        });
    }

    Ok(Json(PaginationOutput::new(views, q.page, total)))
}

async fn get_batch(
    State(state): State<ApiState>,
    Path(batch_id): Path<i64>,
) -> Result<Json<BatchView>, ApiError> {
    Ok(Json(batch_view(&state, batch_id).await?))
}

async fn get_batch_jobs(
    State(state): State<ApiState>,
    Path(batch_id): Path<i64>,
    Query(q): Query<JobListQuery>,
) -> Result<Json<PaginationOutput<JobView>>, ApiError> {
    check_page(q.page)?;
    // 404 for a batch that does not exist, not an empty page.
    batch_view(&state, batch_id).await?;
    let filter = job_filter(&q, Some(batch_id))?;

    let (jobs, total) = state
        .jobs
        .list(&filter, q.page, PER_PAGE, q.desc)
        .await
        .map_err(internal_err)?;
    let views = job_views(&state, jobs).await.map_err(internal_err)?;

    Ok(Json(PaginationOutput::new(views, q.page, total)))
}

// ----------------------------
// URLs / repeaters / stats
// ----------------------------

async fn list_urls(
    State(state): State<ApiState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<PaginationOutput<Url>>, ApiError> {
    check_page(q.page)?;
    let (urls, total) = state
        .urls
        .list(q.page, PER_PAGE, q.after, q.desc)
        .await
        .map_err(internal_err)?;
    Ok(Json(PaginationOutput::new(urls, q.page, total)))
}

async fn list_repeat_urls(
    State(state): State<ApiState>,
    Query(q): Query<PageQuery>,
) -> Result<Json<PaginationOutput<RepeatUrl>>, ApiError> {
    check_page(q.page)?;
    let (repeats, total) = state
        .repeats
        .list(q.page, PER_PAGE, q.after, q.desc)
        .await
        .map_err(internal_err)?;
    Ok(Json(PaginationOutput::new(repeats, q.page, total)))
}

async fn stats(State(state): State<ApiState>) -> Result<Json<Stats>, ApiError> {
    let snapshot = state.stats.snapshot().await.map_err(internal_err)?;
    Ok(Json(snapshot))
}

async fn health() -> &'static str {
    "ok"
}
