use sqlx::{postgres::PgPoolOptions, PgPool};

/// The pool is shared by the scheduler, the planner, and the API handlers;
/// size it for all three via `ARCHIVER_DATABASE_POOL_SIZE`.
pub async fn make_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
