//! Scheduled task model.
//!
//! One row per recurring job definition. Rows are created at registration,
//! mutated on every run, and never auto-deleted — the row is the task's
//! operational history.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Scheduled Task
// ---------------------------------------------------------------------------

/// A recurring unit of work whose next run time and progress persist
/// between executions.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: String,

    /// Owner while the task runs; cleared on completion.
    pub worker_id: Option<String>,

    pub group: String,
    pub description: String,

    /// Handler selector, resolved through the handler registry.
    pub task_type: String,

    pub last_execution: Option<DateTime<Utc>>,

    /// None means the task will not be scheduled again. When present it is
    /// strictly later than `last_execution` as of the run that computed it.
    pub next_execution: Option<DateTime<Utc>>,

    pub execution_count: i64,
    pub status: TaskStatus,

    /// Accumulated error text, appended per faulted run. History preserved.
    pub errors: String,

    /// Serialized task state handed to the handler on each run.
    pub payload: String,

    /// Fractional completion, 0..1. Informational only.
    pub progress: f64,
}

impl ScheduledTask {
    /// Deserialize the persisted task state into its typed form.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Registration-time description of a scheduled task.
#[derive(Debug, Clone)]
pub struct NewScheduledTask {
    pub(crate) id: String,
    pub(crate) group: String,
    pub(crate) description: String,
    pub(crate) task_type: String,
    pub(crate) next_execution: Option<DateTime<Utc>>,
    pub(crate) payload: String,
}

impl NewScheduledTask {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: String::new(),
            description: String::new(),
            task_type: task_type.into(),
            next_execution: None,
            payload: "null".to_string(),
        }
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// First due time. A task registered without one stays dormant until a
    /// collaborator sets it.
    pub fn next_execution(mut self, at: DateTime<Utc>) -> Self {
        self.next_execution = Some(at);
        self
    }

    pub fn payload<T: serde::Serialize>(mut self, state: &T) -> Result<Self> {
        self.payload = serde_json::to_string(state)?;
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a scheduled task.
///
/// `Idle → Running → {Completed | Faulted}`, then back through Running on
/// the next due run while `next_execution` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Idle,
    Running,
    Completed,
    Faulted,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Faulted => "faulted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(TaskStatus::Idle),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "faulted" => Ok(TaskStatus::Faulted),
            _ => Err(Error::Other(format!("unknown task status: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            TaskStatus::Idle,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Faulted,
        ] {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn builder_defaults() {
        let task = NewScheduledTask::new("nightly-report", "report.generate");
        assert_eq!(task.id, "nightly-report");
        assert_eq!(task.payload, "null");
        assert!(task.next_execution.is_none());
    }
}
