//! Job records and the persistence gateway.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteJobStore;
pub use store::{JobError, JobFilter, JobOrder, JobStore};
pub use types::{Job, JobStatus, PartOutcome};
