#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use queuectl::database::models::JobCommand;
use queuectl::database::repositories::{JobStore, SqlxJobStore};
use queuectl::database::{self, sqlite_url};
use queuectl::queue::{
    BackoffMode, BackoffPolicy, CommandOutcome, CommandRunner, JobQueue, ManualClock,
    QueueConfig, Worker, WorkerConfig,
};

pub const T0: i64 = 1_700_000_000_000;

pub async fn open_store(dir: &TempDir) -> Arc<dyn JobStore> {
    let url = sqlite_url(dir.path().join("queue.db"));
    let (pool, write_pool) = database::open(&url).await.unwrap();
    Arc::new(SqlxJobStore::new(pool, write_pool))
}

pub fn queue_with_clock(store: Arc<dyn JobStore>, clock: Arc<ManualClock>) -> Arc<JobQueue> {
    Arc::new(JobQueue::new(QueueConfig::default(), store).with_clock(clock))
}

/// Worker config that never sleeps through a backoff.
pub fn no_wait_config() -> WorkerConfig {
    WorkerConfig {
        default_timeout_secs: 5,
        poll_interval_ms: 10,
        backoff: BackoffPolicy {
            base: 2,
            max: 0,
            jitter: false,
        },
        backoff_mode: BackoffMode::Blocking,
    }
}

pub fn worker(
    queue: Arc<JobQueue>,
    runner: Arc<dyn CommandRunner>,
    config: WorkerConfig,
) -> Worker {
    Worker::new(1, queue, runner, config, CancellationToken::new())
}

pub fn exited(code: i32) -> CommandOutcome {
    CommandOutcome::Exited {
        code,
        stdout: format!("exit {code}\n"),
        stderr: String::new(),
    }
}

/// Runner that replays scripted outcomes, then repeats a fallback.
pub struct ScriptedRunner {
    script: Mutex<VecDeque<CommandOutcome>>,
    fallback: CommandOutcome,
    calls: DashMap<String, usize>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<CommandOutcome>, fallback: CommandOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: DashMap::new(),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Vec::new(), exited(0))
    }

    pub fn failing(code: i32) -> Self {
        Self::new(Vec::new(), exited(code))
    }

    pub fn calls(&self, command: &str) -> usize {
        self.calls.get(command).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &JobCommand, _timeout: Duration) -> CommandOutcome {
        *self.calls.entry(command.to_string()).or_insert(0) += 1;
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
