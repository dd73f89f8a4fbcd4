use std::time::Duration;

use crate::archive::DEFAULT_SAVE_URL;
use crate::worker::planner::PlannerConfig;
use crate::worker::url_worker::WorkerConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_pool_size: u32,
    pub bind_addr: String,
    pub save_url: String,
    pub request_timeout_secs: u64,
    pub min_interval_secs: i64,
    pub planner_period_secs: u64,
    pub meta_batch_window_secs: i64,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_or_fallback("ARCHIVER_DATABASE_URL", "DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let database_pool_size = env_or_fallback("ARCHIVER_DATABASE_POOL_SIZE", "DATABASE_POOL_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let bind_addr = env_or_fallback("ARCHIVER_BIND_ADDR", "BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string());

        let save_url = env_or_fallback("ARCHIVER_SAVE_URL", "SAVE_URL")
            .unwrap_or_else(|| DEFAULT_SAVE_URL.to_string());

        let request_timeout_secs = env_or_fallback("ARCHIVER_REQUEST_TIMEOUT_SECS", "REQUEST_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let min_interval_secs = env_or_fallback("ARCHIVER_MIN_INTERVAL_SECS", "MIN_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(3600);

        let planner_period_secs = env_or_fallback("ARCHIVER_PLANNER_PERIOD_SECS", "PLANNER_PERIOD_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let meta_batch_window_secs =
            env_or_fallback("ARCHIVER_META_BATCH_WINDOW_SECS", "META_BATCH_WINDOW_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(30 * 60);

        let migrate_on_startup = env_bool("ARCHIVER_MIGRATE_ON_STARTUP").unwrap_or(false);

        Ok(Self {
            database_url,
            database_pool_size,
            bind_addr,
            save_url,
            request_timeout_secs,
            min_interval_secs,
            planner_period_secs,
            meta_batch_window_secs,
            migrate_on_startup,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            min_interval: chrono::Duration::seconds(self.min_interval_secs),
            ..WorkerConfig::default()
        }
    }

    pub fn planner_config(&self) -> PlannerConfig {
        PlannerConfig {
            period: Duration::from_secs(self.planner_period_secs),
            meta_batch_window: chrono::Duration::seconds(self.meta_batch_window_secs),
        }
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
