use std::env;

use archiveflow::db;
use archiveflow::enqueue::{BatchRequest, EnqueueService, DEFAULT_REPEAT_INTERVAL};
use archiveflow::store::StatsRepo;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "archivectl <command>\n\
             Commands:\n\
             - submit <url> [url...]\n\
             - submit-file <path>\n\
             - loop <url> [interval_secs]\n\
             - stats\n\
             \n\
             Uses DATABASE_URL.\n"
        );
        std::process::exit(2);
    }

    dotenvy::dotenv().ok();
    let url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::make_pool(&url, 5).await?;

    match args[1].as_str() {
        "submit" => {
            let urls: Vec<String> = args[2..].to_vec();
            submit(&pool, urls).await?;
        }
        "submit-file" => {
            let path = args.get(2).expect("usage: archivectl submit-file <path>");
            let contents = std::fs::read_to_string(path)?;
            let urls: Vec<String> = contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            submit(&pool, urls).await?;
        }
        "loop" => {
            let target = args.get(2).expect("usage: archivectl loop <url> [interval_secs]");
            let interval: i64 = args
                .get(3)
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REPEAT_INTERVAL);
            let enqueue = EnqueueService::new(pool.clone());
            let repeat_id = enqueue.declare_repeat(target, interval).await?;
            println!("repeat id={repeat_id} url={target} interval={interval}s");
        }
        "stats" => {
            let stats = StatsRepo::new(pool.clone(), chrono::Duration::hours(1))
                .snapshot()
                .await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn submit(pool: &sqlx::PgPool, urls: Vec<String>) -> anyhow::Result<()> {
    let enqueue = EnqueueService::new(pool.clone());
    let submission = enqueue
        .submit_batch(BatchRequest {
            urls,
            ..BatchRequest::default()
        })
        .await?;
    println!(
        "batch id={} jobs={}",
        submission.batch_id, submission.job_count
    );
    Ok(())
}
