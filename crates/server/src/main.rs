use std::pin::pin;

use archiveflow::api::{self, ApiState};
use archiveflow::archive::ArchiveClient;
use archiveflow::config::Config;
use archiveflow::db;
use archiveflow::enqueue::EnqueueService;
use archiveflow::store::{BatchesRepo, JobsRepo, RepeatsRepo, StatsRepo, UrlsRepo};
use archiveflow::supervisor::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,archiveflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cfg = Config::from_env()?;
    info!(
        bind_addr = %cfg.bind_addr,
        save_url = %cfg.save_url,
        min_interval_secs = cfg.min_interval_secs,
        planner_period_secs = cfg.planner_period_secs,
        "archiveflow starting"
    );

    let pool = db::make_pool(&cfg.database_url, cfg.database_pool_size).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let client = ArchiveClient::new(&cfg.save_url, cfg.request_timeout())?;

    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::start(
        pool.clone(),
        client,
        cfg.worker_config(),
        cfg.planner_config(),
        shutdown.clone(),
    );

    let state = ApiState {
        enqueue: EnqueueService::new(pool.clone()),
        jobs: JobsRepo::new(pool.clone()),
        batches: BatchesRepo::new(pool.clone()),
        urls: UrlsRepo::new(pool.clone()),
        repeats: RepeatsRepo::new(pool.clone()),
        stats: StatsRepo::new(
            pool.clone(),
            chrono::Duration::seconds(cfg.min_interval_secs),
        ),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(addr = %cfg.bind_addr, "api listening");
    let api_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }
    });

    let mut workers = pin!(supervisor.wait());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
        res = &mut workers => {
            // A worker loop died before shutdown; wait() has already
            // cancelled everything else.
            let _ = api_task.await;
            pool.close().await;
            res?;
            anyhow::bail!("worker loops exited before shutdown");
        }
    }

    workers.await?;
    api_task.await??;
    pool.close().await;
    info!("archiveflow stopped");

    Ok(())
}
