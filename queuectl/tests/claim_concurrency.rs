mod common;

use dashmap::DashSet;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinSet;

use queuectl::database::models::JobState;
use queuectl::database::repositories::JobStore;
use queuectl::database::time::now_ms;
use queuectl::queue::{JobQueue, JobSpec, QueueConfig};

use common::open_store;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn one_job_many_claimers_yields_one_winner() {
    const CLAIMERS: usize = 16;

    let dir = TempDir::new().unwrap();
    let seed = open_store(&dir).await;
    let queue = JobQueue::new(QueueConfig::default(), seed);
    queue
        .submit(JobSpec::new("echo once").with_id("only"))
        .await
        .unwrap();

    // Independent stores behave like separate processes sharing the file.
    let mut stores: Vec<Arc<dyn JobStore>> = Vec::with_capacity(CLAIMERS);
    for _ in 0..CLAIMERS {
        stores.push(open_store(&dir).await);
    }

    let mut claimers = JoinSet::new();
    for store in stores {
        claimers.spawn(async move { store.claim_next_job(now_ms()).await.unwrap() });
    }

    let mut winners = Vec::new();
    while let Some(res) = claimers.join_next().await {
        if let Some(job) = res.unwrap() {
            winners.push(job);
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, "only");
    assert_eq!(winners[0].state, JobState::Processing);
    assert_eq!(queue.status().await.unwrap().processing, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn backlog_is_claimed_exactly_once() {
    const JOBS: usize = 120;
    const CLAIMERS: usize = 8;

    let dir = TempDir::new().unwrap();
    let queue = Arc::new(JobQueue::new(QueueConfig::default(), open_store(&dir).await));
    for i in 0..JOBS {
        let spec = JobSpec::new(format!("job {i}"))
            .with_id(format!("job-{i}"))
            .with_priority((i % 5) as i64 - 2);
        queue.submit(spec).await.unwrap();
    }

    let claimed = Arc::new(DashSet::<String>::new());
    let mut claimers = JoinSet::new();
    for c in 0..CLAIMERS {
        // Half share the queue's store, half open their own.
        let store = if c % 2 == 0 {
            queue.store().clone()
        } else {
            open_store(&dir).await
        };
        let claimed = claimed.clone();
        claimers.spawn(async move {
            while let Some(mut job) = store.claim_next_job(now_ms()).await.unwrap() {
                assert!(claimed.insert(job.id.clone()), "{} claimed twice", job.id);
                job.mark_completed(now_ms());
                store.update_job(&job).await.unwrap();
            }
        });
    }
    while let Some(res) = claimers.join_next().await {
        res.unwrap();
    }

    assert_eq!(claimed.len(), JOBS);
    let counts = queue.status().await.unwrap();
    assert_eq!(counts.completed, JOBS as u64);
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.processing, 0);
}
