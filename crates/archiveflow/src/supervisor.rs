use sqlx::PgPool;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::archive::Capture;
use crate::store::JobsRepo;
use crate::worker::{PlannerConfig, RepeatPlanner, UrlWorker, WorkerConfig};

/// Owns the two long-running loops. Both observe the shared cancellation
/// token at their next suspension point; a task that dies takes the other
/// one down with it. Restarting is left to the outer process supervisor.
pub struct Supervisor {
    shutdown: CancellationToken,
    url_worker: JoinHandle<anyhow::Result<()>>,
    planner: JoinHandle<anyhow::Result<()>>,
}

impl Supervisor {
    pub fn start<C>(
        pool: PgPool,
        capture: C,
        worker_cfg: WorkerConfig,
        planner_cfg: PlannerConfig,
        shutdown: CancellationToken,
    ) -> Self
    where
        C: Capture + 'static,
    {
        let worker = UrlWorker::new(JobsRepo::new(pool.clone()), capture, worker_cfg);
        let url_worker = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        let planner = RepeatPlanner::new(pool, planner_cfg);
        let planner = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                let mut planner = planner;
                planner.run(shutdown).await
            }
        });

        Self {
            shutdown,
            url_worker,
            planner,
        }
    }

    /// Completes when either loop exits. Under normal operation that only
    /// happens after cancellation; any earlier exit is a failure and brings
    /// the surviving loop down before this returns.
    pub async fn wait(mut self) -> anyhow::Result<()> {
        let (name, first) = tokio::select! {
            res = &mut self.url_worker => ("url worker", res),
            res = &mut self.planner => ("repeat planner", res),
        };

        if !self.shutdown.is_cancelled() {
            warn!(task = name, "task exited before shutdown, stopping the other loop");
            self.shutdown.cancel();
        }

        let (other_name, second) = if name == "url worker" {
            ("repeat planner", (&mut self.planner).await)
        } else {
            ("url worker", (&mut self.url_worker).await)
        };

        report(name, first)?;
        report(other_name, second)?;
        Ok(())
    }
}

fn report(name: &str, joined: Result<anyhow::Result<()>, JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            error!(task = name, error = ?err, "task failed");
            Err(err.context(format!("{name} task failed")))
        }
        Err(err) => {
            error!(task = name, error = ?err, "task panicked");
            Err(anyhow::Error::new(err).context(format!("{name} task panicked")))
        }
    }
}
