//! Scheduler loop: run due recurring tasks under their locks.
//!
//! Every replica runs the same scan; the lock keyed by the task id decides
//! which replica actually executes a given run. Losing that race is routine
//! and skips the task, never an error. When the run is recomputed, the next
//! due time comes from a collaborator — the core only persists it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::db::Db;
use crate::dispatch::HandlerRegistry;
use crate::error::{Error, Result};
use crate::model::ScheduledTask;
use crate::telemetry::metrics;

/// Computes a task's next due time after a run.
///
/// Implementations must return a time strictly later than `now` (which the
/// store records as the run's `last_execution`), or `None` to retire the
/// task.
pub trait RecurrencePolicy: Send + Sync {
    fn next_execution(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Re-run every task at a fixed interval.
#[derive(Debug, Clone, Copy)]
pub struct FixedInterval(pub Duration);

impl RecurrencePolicy for FixedInterval {
    fn next_execution(&self, _task: &ScheduledTask, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        Some(now + TimeDelta::milliseconds(self.0.as_millis() as i64))
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between due-scans.
    pub scan_interval: Duration,

    /// Lease window taken per task run. A run outliving its lease loses the
    /// release and another replica may pick the task up — size it above the
    /// longest expected run.
    pub lease_duration: Duration,

    /// Identity recorded on task rows while this process runs them.
    pub worker_id: String,
}

impl SchedulerConfig {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            lease_duration: Duration::from_secs(60),
            worker_id: worker_id.into(),
        }
    }

    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }
}

/// The recurring-task loop.
pub struct Scheduler<Context> {
    db: Arc<Db>,
    registry: Arc<HandlerRegistry<Context>>,
    context: Context,
    recurrence: Arc<dyn RecurrencePolicy>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl<Context: Clone + Send + Sync + 'static> Scheduler<Context> {
    pub fn new(
        db: Arc<Db>,
        registry: Arc<HandlerRegistry<Context>>,
        context: Context,
        recurrence: Arc<dyn RecurrencePolicy>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            registry,
            context,
            recurrence,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// A handle for stopping this scheduler from outside the loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled.
    pub async fn run(&self) {
        info!(worker_id = %self.config.worker_id, "scheduler started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Err(e) = self.run_pending().await {
                error!(error = %e, "scheduler scan failed");
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.scan_interval) => {}
            }
        }

        info!("scheduler stopped");
    }

    /// One due-scan: attempt every due task once. Returns how many this
    /// process actually ran. Lock contention and handler failures are
    /// contained per task.
    pub async fn run_pending(&self) -> Result<usize> {
        let due = self.db.list_due_tasks(self.db.now()).await?;
        let mut ran = 0;

        for task in due {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.run_task(&task).await {
                Ok(()) => ran += 1,
                Err(Error::LockNotAcquired { .. }) => {
                    debug!(task = %task.id, "task locked by another replica, skipping");
                }
                Err(e) => {
                    error!(task = %task.id, error = %e, "task run failed");
                }
            }
        }

        Ok(ran)
    }

    async fn run_task(&self, task: &ScheduledTask) -> Result<()> {
        let lease = self
            .db
            .acquire_lock(&task_lock_name(&task.id), self.config.lease_duration)
            .await?;

        let result = self.execute_locked(task).await;

        // The lease is given up even when the run itself failed. Losing it
        // here means the run overstayed the lease window.
        if let Err(release_err) = self.db.release_lock(&lease).await {
            warn!(task = %task.id, error = %release_err, "task lease release failed");
        }

        result
    }

    async fn execute_locked(&self, task: &ScheduledTask) -> Result<()> {
        self.db
            .begin_task_run(&task.id, &self.config.worker_id)
            .await?;

        let outcome = match serde_json::from_str::<serde_json::Value>(&task.payload) {
            Ok(payload) => match self.registry.get(&task.task_type) {
                Some(run) => run(self.context.clone(), payload).await,
                None => Err(anyhow::anyhow!(
                    "no handler registered for task type '{}'",
                    task.task_type
                )),
            },
            Err(e) => Err(anyhow::anyhow!("task payload decode: {e}")),
        };

        let now = self.db.now();
        let next = self.recurrence.next_execution(task, now);

        match outcome {
            Ok(()) => {
                self.db.complete_task_run(&task.id, next).await?;
                metrics::task_runs().add(1, &[KeyValue::new("status", "completed")]);
            }
            Err(handler_err) => {
                warn!(task = %task.id, error = %format!("{handler_err:#}"), "task faulted");
                self.db
                    .fail_task_run(&task.id, &format!("{handler_err:#}"), next)
                    .await?;
                metrics::task_runs().add(1, &[KeyValue::new("status", "faulted")]);
            }
        }

        Ok(())
    }
}

/// Lock name protecting a task's runs across replicas.
fn task_lock_name(task_id: &str) -> String {
    format!("task:{task_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_interval_is_strictly_in_the_future() {
        let policy = FixedInterval(Duration::from_secs(60));
        let task = ScheduledTask {
            id: "t".to_string(),
            worker_id: None,
            group: String::new(),
            description: String::new(),
            task_type: "noop".to_string(),
            last_execution: None,
            next_execution: None,
            execution_count: 0,
            status: crate::model::TaskStatus::Idle,
            errors: String::new(),
            payload: "null".to_string(),
            progress: 0.0,
        };
        let now = Utc::now();
        assert!(policy.next_execution(&task, now).unwrap() > now);
    }

    #[test]
    fn task_lock_names_are_namespaced() {
        assert_eq!(task_lock_name("nightly-report"), "task:nightly-report");
    }
}
