//! Database models.

pub mod command;
pub mod dead_letter;
pub mod job;
pub mod job_log;

pub use command::JobCommand;
pub use dead_letter::DeadLetterEntry;
pub use job::{DEFAULT_PRIORITY, Job, JobCounts, JobState};
pub use job_log::{JobLogEntry, JobMetricEntry, average_runtime};
