pub mod planner;
pub mod url_worker;

pub use planner::{PlannerConfig, RepeatPlanner};
pub use url_worker::{UrlWorker, WorkOutcome, WorkerConfig};
