//! Repository layer for database access.

pub mod job;
pub mod job_tx;

pub use job::{JobStore, SqlxJobStore};
pub use job_tx::JobTxOps;
