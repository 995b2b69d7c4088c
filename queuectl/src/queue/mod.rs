//! Job lifecycle: submission, claiming, execution and retry.

pub mod backoff;
pub mod clock;
pub mod dead_letter;
pub mod job_queue;
pub mod runner;
pub mod worker;
pub mod worker_pool;

pub use backoff::{BackoffPolicy, compute_delay};
pub use clock::{Clock, IdGenerator, ManualClock, SystemClock, UuidGenerator};
pub use dead_letter::DeadLetterStore;
pub use job_queue::{JobQueue, JobSpec, QueueConfig};
pub use runner::{CommandOutcome, CommandRunner, ShellCommandRunner};
pub use worker::{AttemptOutcome, BackoffMode, Worker, WorkerConfig};
pub use worker_pool::WorkerPool;
