mod cli;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use queuectl::config::Settings;
use queuectl::database::{
    self,
    models::{Job, average_runtime},
    repositories::{JobStore, SqlxJobStore},
    time::ms_to_rfc3339,
};
use queuectl::logging;
use queuectl::queue::{
    CommandRunner, DeadLetterStore, JobQueue, JobSpec, ShellCommandRunner, WorkerPool,
};

use crate::cli::{Cli, Commands, DlqCommands, WorkerCommands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let _guard = logging::init_logging(&settings.log_level, settings.log_dir.as_deref())?;

    run(cli.command, settings).await
}

async fn open_queue(settings: &Settings) -> anyhow::Result<Arc<JobQueue>> {
    let url = settings.database_url();
    let (pool, write_pool) = database::open(&url)
        .await
        .with_context(|| format!("failed to open database {}", settings.db_path.display()))?;
    let store: Arc<dyn JobStore> = Arc::new(SqlxJobStore::new(pool, write_pool));
    Ok(Arc::new(JobQueue::new(settings.queue_config(), store)))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn job_json(job: &Job) -> serde_json::Value {
    json!({
        "id": job.id,
        "command": job.command,
        "state": job.state,
        "attempts": job.attempts,
        "max_retries": job.max_retries,
        "created_at": ms_to_rfc3339(job.created_at),
        "updated_at": ms_to_rfc3339(job.updated_at),
        "last_error": job.last_error,
        "run_at": job.run_at.map(ms_to_rfc3339),
        "priority": job.priority,
        "timeout_seconds": job.timeout_seconds,
    })
}

async fn run(command: Commands, settings: Settings) -> anyhow::Result<()> {
    let queue = open_queue(&settings).await?;

    match command {
        Commands::Enqueue { job, max_retries } => {
            let spec: JobSpec = serde_json::from_str(&job).context("invalid job JSON")?;
            let job = match max_retries {
                Some(max_retries) => queue.enqueue(spec, max_retries).await?,
                None => queue.submit(spec).await?,
            };
            print_json(&job_json(&job))?;
        }
        Commands::List { state } => {
            let jobs = queue.list(state).await?;
            let jobs: Vec<_> = jobs.iter().map(job_json).collect();
            print_json(&jobs)?;
        }
        Commands::Status => {
            let counts = queue.status().await?;
            print_json(&counts)?;
        }
        Commands::Dlq { command } => {
            let dlq = DeadLetterStore::new(queue);
            match command {
                DlqCommands::List => {
                    let entries: Vec<_> = dlq
                        .list()
                        .await?
                        .into_iter()
                        .map(|entry| {
                            json!({
                                "id": entry.id,
                                "command": entry.command,
                                "attempts": entry.attempts,
                                "created_at": ms_to_rfc3339(entry.created_at),
                                "last_error": entry.last_error,
                            })
                        })
                        .collect();
                    print_json(&entries)?;
                }
                DlqCommands::Retry { job_id } => match dlq.requeue(&job_id).await? {
                    Some(job) => print_json(&job_json(&job))?,
                    None => anyhow::bail!("no dead-lettered job with id {job_id}"),
                },
            }
        }
        Commands::Logs { job_id } => {
            let (logs, metrics) = queue.logs_and_metrics(&job_id).await?;
            let runs: Vec<_> = logs
                .iter()
                .map(|log| {
                    json!({
                        "timestamp": ms_to_rfc3339(log.timestamp),
                        "stdout": log.stdout,
                        "stderr": log.stderr,
                    })
                })
                .collect();
            let runtimes: Vec<f64> = metrics.iter().map(|m| m.runtime_seconds).collect();
            print_json(&json!({
                "job_id": job_id,
                "runs": runs,
                "runtimes_seconds": runtimes,
                "average_runtime_seconds": average_runtime(&metrics),
            }))?;
        }
        Commands::Worker {
            command: WorkerCommands::Start { count },
        } => {
            let size = count.unwrap_or(settings.worker_count);
            let pool = WorkerPool::new(size, settings.worker_config());
            let runner: Arc<dyn CommandRunner> = Arc::new(ShellCommandRunner);
            pool.start(queue, runner);

            let token = pool.cancellation_token();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Shutdown requested, finishing in-flight jobs");
                        token.cancel();
                    }
                    Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
                }
            });

            pool.join().await.context("worker pool stopped on error")?;
            info!("Worker pool stopped");
        }
        Commands::Recover { older_than_secs } => {
            let recovered = queue
                .recover_stale(Duration::from_secs(older_than_secs))
                .await?;
            print_json(&json!({ "recovered": recovered }))?;
        }
    }

    Ok(())
}
