use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use taskhost::cancel::CancellationToken;
use taskhost::db::Db;
use taskhost::dispatch::{HandlerRegistry, Job};
use taskhost::worker::{Worker, WorkerConfig};

async fn test_db() -> Arc<Db> {
    let db = Db::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    Arc::new(db)
}

#[derive(Debug, Serialize, Deserialize)]
struct AddJob {
    amount: usize,
}

impl Job for AddJob {
    const JOB_TYPE: &'static str = "test.add";
    type Context = Arc<AtomicUsize>;

    async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
        ctx.fetch_add(self.amount, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ExplodingJob;

impl Job for ExplodingJob {
    const JOB_TYPE: &'static str = "test.explode";
    type Context = Arc<AtomicUsize>;

    async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
        ctx.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("always fails")
    }
}

#[tokio::test]
async fn worker_drains_the_queue_and_removes_handled_rows() {
    let db = test_db().await;

    let mut registry = HandlerRegistry::new();
    registry.register::<AddJob>().unwrap();

    for amount in [1, 2, 3] {
        db.enqueue_job(&AddJob { amount }).await.unwrap();
    }

    let counter = Arc::new(AtomicUsize::new(0));
    let worker = Worker::new(
        Arc::clone(&db),
        Arc::new(registry),
        Arc::clone(&counter),
        WorkerConfig::new(5).shutdown_when_empty(),
    );
    worker.run().await;

    assert_eq!(counter.load(Ordering::SeqCst), 6);
    assert_eq!(db.queue_count(AddJob::JOB_TYPE).await.unwrap(), 0);
    // Handled rows are deleted outright, so nothing is left to purge.
    assert_eq!(db.cleanup_queue(10).await.unwrap(), 0);
}

#[tokio::test]
async fn failing_job_is_retried_until_the_poison_threshold() {
    let db = test_db().await;

    let mut registry = HandlerRegistry::new();
    registry.register::<ExplodingJob>().unwrap();

    db.enqueue_job(&ExplodingJob).await.unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let worker = Worker::new(
        Arc::clone(&db),
        Arc::new(registry),
        Arc::clone(&attempts),
        WorkerConfig::new(3).shutdown_when_empty(),
    );
    worker.run().await;

    // Attempted at dequeue counts 1, 2, 3; the third failure quarantines it.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let cancel = CancellationToken::new();
    assert!(
        db.dequeue_message(ExplodingJob::JOB_TYPE, &cancel)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(db.queue_count(ExplodingJob::JOB_TYPE).await.unwrap(), 0);
}

#[tokio::test]
async fn corrupt_payload_flows_into_the_poison_path() {
    let db = test_db().await;

    let mut registry = HandlerRegistry::new();
    registry.register::<AddJob>().unwrap();

    db.enqueue_message(AddJob::JOB_TYPE, "not json at all")
        .await
        .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let worker = Worker::new(
        Arc::clone(&db),
        Arc::new(registry),
        Arc::clone(&counter),
        WorkerConfig::new(2).shutdown_when_empty(),
    );
    worker.run().await;

    // The handler never ran, and the message is out of circulation.
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(db.queue_count(AddJob::JOB_TYPE).await.unwrap(), 0);
}

#[tokio::test]
async fn cancellation_stops_an_idle_worker() {
    let db = test_db().await;

    let mut registry = HandlerRegistry::new();
    registry.register::<AddJob>().unwrap();

    let worker = Worker::new(
        Arc::clone(&db),
        Arc::new(registry),
        Arc::new(AtomicUsize::new(0)),
        WorkerConfig::new(5),
    );
    let cancel = worker.cancellation_token();

    let handle = tokio::spawn(async move { worker.run().await });
    cancel.cancel();
    handle.await.unwrap();
}
