pub mod batches;
pub mod jobs;
pub mod model;
pub mod repeats;
pub mod stats;
pub mod urls;

pub use batches::BatchesRepo;
pub use jobs::JobsRepo;
pub use repeats::RepeatsRepo;
pub use stats::StatsRepo;
pub use urls::UrlsRepo;

/// Uniqueness or foreign-key violation raised by a concurrent writer.
/// The surrounding transaction may be retried once before surfacing.
pub fn is_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("23505") | Some("23503")),
        _ => false,
    }
}
