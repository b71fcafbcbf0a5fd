//! Scheduled task store: registration, due-scan, and run lifecycle writes.
//!
//! The store records what ran and when; mutual exclusion for the runs
//! themselves belongs to the lock manager, not to these rows. Error text is
//! appended, never overwritten — the column is the task's failure history.

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::error::{Error, Result};
use crate::model::ScheduledTask;
use crate::model::task::NewScheduledTask;

use super::millis_to_datetime;

impl super::Db {
    /// Register a task. One row per task id; re-registration is an error
    /// (rows are operational history and are never auto-deleted).
    pub async fn insert_task(&self, task: NewScheduledTask) -> Result<()> {
        sqlx::query(self.catalog().task_insert)
            .bind(&task.id)
            .bind(&task.group)
            .bind(&task.description)
            .bind(&task.task_type)
            .bind(task.next_execution.map(|t| t.timestamp_millis()))
            .bind(&task.payload)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<ScheduledTask> {
        let row: Option<TaskRow> = sqlx::query_as(self.catalog().task_select)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.ok_or_else(|| Error::NotFound(format!("scheduled task {id}")))?
            .try_into_task()
    }

    pub async fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(self.catalog().task_select_all)
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    /// Tasks whose `next_execution` has arrived, soonest first.
    pub async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(self.catalog().task_select_due)
            .bind(now.timestamp_millis())
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(TaskRow::try_into_task).collect()
    }

    /// Transition a task to running under `worker_id`. Callers hold the
    /// task's lock; this write records ownership, it does not arbitrate it.
    #[instrument(skip(self))]
    pub async fn begin_task_run(&self, id: &str, worker_id: &str) -> Result<()> {
        let rows = sqlx::query(self.catalog().task_begin)
            .bind(worker_id)
            .bind(id)
            .execute(self.pool())
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(Error::NotFound(format!("scheduled task {id}")));
        }
        Ok(())
    }

    /// Record a successful run: last execution stamped now, count bumped,
    /// progress finalized, and the collaborator-computed next due time
    /// stored (None retires the task).
    pub async fn complete_task_run(
        &self,
        id: &str,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let rows = sqlx::query(self.catalog().task_complete)
            .bind(self.now().timestamp_millis())
            .bind(next_execution.map(|t| t.timestamp_millis()))
            .bind(id)
            .execute(self.pool())
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(Error::NotFound(format!("scheduled task {id}")));
        }
        Ok(())
    }

    /// Record a faulted run. The error line is appended to the task's
    /// history; scheduling policy still decides whether it runs again.
    pub async fn fail_task_run(
        &self,
        id: &str,
        error: &str,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = self.now();
        let entry = format!("[{}] {}\n", now.to_rfc3339(), error);

        let rows = sqlx::query(self.catalog().task_fail)
            .bind(now.timestamp_millis())
            .bind(next_execution.map(|t| t.timestamp_millis()))
            .bind(&entry)
            .bind(id)
            .execute(self.pool())
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(Error::NotFound(format!("scheduled task {id}")));
        }
        Ok(())
    }

    /// Mid-run progress report from a long-running handler. Informational
    /// only; clamped to 0..1.
    pub async fn update_task_progress(&self, id: &str, progress: f64) -> Result<()> {
        let rows = sqlx::query(self.catalog().task_progress)
            .bind(progress.clamp(0.0, 1.0))
            .bind(id)
            .execute(self.pool())
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(Error::NotFound(format!("scheduled task {id}")));
        }
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    worker_id: Option<String>,
    task_group: String,
    description: String,
    task_type: String,
    last_execution: Option<i64>,
    next_execution: Option<i64>,
    execution_count: i64,
    status: String,
    errors: String,
    payload: String,
    progress: f64,
}

impl TaskRow {
    fn try_into_task(self) -> Result<ScheduledTask> {
        Ok(ScheduledTask {
            id: self.id,
            worker_id: self.worker_id,
            group: self.task_group,
            description: self.description,
            task_type: self.task_type,
            last_execution: self.last_execution.map(millis_to_datetime),
            next_execution: self.next_execution.map(millis_to_datetime),
            execution_count: self.execution_count,
            status: self.status.parse()?,
            errors: self.errors,
            payload: self.payload,
            progress: self.progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use crate::db::Db;
    use crate::model::TaskStatus;
    use crate::model::task::NewScheduledTask;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn registration_round_trips() {
        let db = test_db().await;
        let due = db.now() + TimeDelta::seconds(60);

        db.insert_task(
            NewScheduledTask::new("nightly-report", "report.generate")
                .group("reports")
                .description("Nightly usage report")
                .next_execution(due),
        )
        .await
        .unwrap();

        let task = db.get_task("nightly-report").await.unwrap();
        assert_eq!(task.status, TaskStatus::Idle);
        assert_eq!(task.group, "reports");
        assert_eq!(task.execution_count, 0);
        assert_eq!(task.next_execution.unwrap().timestamp_millis(), due.timestamp_millis());
        assert!(task.errors.is_empty());
    }

    #[tokio::test]
    async fn due_scan_excludes_future_tasks() {
        let db = test_db().await;
        let now = db.now();

        db.insert_task(
            NewScheduledTask::new("past", "noop").next_execution(now - TimeDelta::seconds(1)),
        )
        .await
        .unwrap();
        db.insert_task(
            NewScheduledTask::new("future", "noop").next_execution(now + TimeDelta::seconds(60)),
        )
        .await
        .unwrap();
        db.insert_task(NewScheduledTask::new("dormant", "noop"))
            .await
            .unwrap();

        let due = db.list_due_tasks(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "past");
    }

    #[tokio::test]
    async fn faulted_runs_append_error_history() {
        let db = test_db().await;
        db.insert_task(NewScheduledTask::new("flaky", "noop"))
            .await
            .unwrap();

        db.begin_task_run("flaky", "worker-1").await.unwrap();
        db.fail_task_run("flaky", "boom", None).await.unwrap();
        db.begin_task_run("flaky", "worker-1").await.unwrap();
        db.fail_task_run("flaky", "bang", None).await.unwrap();

        let task = db.get_task("flaky").await.unwrap();
        assert_eq!(task.status, TaskStatus::Faulted);
        assert_eq!(task.execution_count, 2);
        assert!(task.errors.contains("boom"));
        assert!(task.errors.contains("bang"));
    }

    #[tokio::test]
    async fn progress_is_clamped() {
        let db = test_db().await;
        db.insert_task(NewScheduledTask::new("long", "noop"))
            .await
            .unwrap();

        db.update_task_progress("long", 1.7).await.unwrap();
        assert_eq!(db.get_task("long").await.unwrap().progress, 1.0);
    }
}
