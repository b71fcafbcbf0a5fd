use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use taskhost::db::Db;
use taskhost::dispatch::{HandlerRegistry, Job};
use taskhost::model::TaskStatus;
use taskhost::model::task::NewScheduledTask;
use taskhost::scheduler::{FixedInterval, Scheduler, SchedulerConfig};

async fn test_db() -> Arc<Db> {
    let db = Db::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    Arc::new(db)
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateReport {
    pages: usize,
}

impl Job for GenerateReport {
    const JOB_TYPE: &'static str = "report.generate";
    type Context = Arc<AtomicUsize>;

    async fn run(&self, ctx: Self::Context) -> anyhow::Result<()> {
        ctx.fetch_add(self.pages, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BrokenTask;

impl Job for BrokenTask {
    const JOB_TYPE: &'static str = "report.broken";
    type Context = Arc<AtomicUsize>;

    async fn run(&self, _ctx: Self::Context) -> anyhow::Result<()> {
        anyhow::bail!("report generator offline")
    }
}

fn scheduler_for(
    db: &Arc<Db>,
    registry: HandlerRegistry<Arc<AtomicUsize>>,
    counter: &Arc<AtomicUsize>,
) -> Scheduler<Arc<AtomicUsize>> {
    Scheduler::new(
        Arc::clone(db),
        Arc::new(registry),
        Arc::clone(counter),
        Arc::new(FixedInterval(Duration::from_secs(3600))),
        SchedulerConfig::new("worker-tests"),
    )
}

#[tokio::test]
async fn due_task_progresses_to_completed() {
    let db = test_db().await;

    let mut registry = HandlerRegistry::new();
    registry.register::<GenerateReport>().unwrap();

    db.insert_task(
        NewScheduledTask::new("nightly-report", GenerateReport::JOB_TYPE)
            .group("reports")
            .payload(&GenerateReport { pages: 4 })
            .unwrap()
            .next_execution(db.now() - TimeDelta::seconds(1)),
    )
    .await
    .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let scheduler = scheduler_for(&db, registry, &counter);

    assert_eq!(scheduler.run_pending().await.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 4);

    let task = db.get_task("nightly-report").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.execution_count, 1);
    assert_eq!(task.progress, 1.0);
    assert!(task.worker_id.is_none());
    assert!(task.next_execution.unwrap() > task.last_execution.unwrap());

    // The task's lock was released; nothing is left to reclaim.
    assert_eq!(db.cleanup_locks().await.unwrap(), 0);
}

#[tokio::test]
async fn completed_task_is_not_due_until_its_next_execution() {
    let db = test_db().await;

    let mut registry = HandlerRegistry::new();
    registry.register::<GenerateReport>().unwrap();

    db.insert_task(
        NewScheduledTask::new("hourly", GenerateReport::JOB_TYPE)
            .payload(&GenerateReport { pages: 1 })
            .unwrap()
            .next_execution(db.now() - TimeDelta::seconds(1)),
    )
    .await
    .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let scheduler = scheduler_for(&db, registry, &counter);

    assert_eq!(scheduler.run_pending().await.unwrap(), 1);
    // Rescheduled an hour out, so a second scan finds nothing due.
    assert_eq!(scheduler.run_pending().await.unwrap(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn faulted_run_appends_history_and_still_advances() {
    let db = test_db().await;

    let mut registry = HandlerRegistry::new();
    registry.register::<BrokenTask>().unwrap();

    db.insert_task(
        NewScheduledTask::new("broken", BrokenTask::JOB_TYPE)
            .next_execution(db.now() - TimeDelta::seconds(1)),
    )
    .await
    .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let scheduler = scheduler_for(&db, registry, &counter);
    scheduler.run_pending().await.unwrap();

    let task = db.get_task("broken").await.unwrap();
    assert_eq!(task.status, TaskStatus::Faulted);
    assert_eq!(task.execution_count, 1);
    assert!(task.errors.contains("report generator offline"));
    assert!(task.next_execution.is_some());
}

#[tokio::test]
async fn unregistered_task_type_faults_with_a_recorded_error() {
    let db = test_db().await;

    db.insert_task(
        NewScheduledTask::new("orphan", "report.unknown")
            .next_execution(db.now() - TimeDelta::seconds(1)),
    )
    .await
    .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let scheduler = scheduler_for(&db, HandlerRegistry::new(), &counter);
    scheduler.run_pending().await.unwrap();

    let task = db.get_task("orphan").await.unwrap();
    assert_eq!(task.status, TaskStatus::Faulted);
    assert!(task.errors.contains("no handler registered"));
}

#[tokio::test]
async fn locked_task_is_skipped_by_other_replicas() {
    let db = test_db().await;

    let mut registry = HandlerRegistry::new();
    registry.register::<GenerateReport>().unwrap();

    db.insert_task(
        NewScheduledTask::new("held", GenerateReport::JOB_TYPE)
            .payload(&GenerateReport { pages: 1 })
            .unwrap()
            .next_execution(db.now() - TimeDelta::seconds(1)),
    )
    .await
    .unwrap();

    // Another replica holds the task's lock.
    let lease = db
        .acquire_lock("task:held", Duration::from_secs(60))
        .await
        .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let scheduler = scheduler_for(&db, registry, &counter);

    assert_eq!(scheduler.run_pending().await.unwrap(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(
        db.get_task("held").await.unwrap().status,
        TaskStatus::Idle
    );

    // Once the other replica lets go, the task runs here.
    db.release_lock(&lease).await.unwrap();
    assert_eq!(scheduler.run_pending().await.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
