use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::models::{TaskRecord, TaskStatus};

/// Handle returned by enqueue (database primary key)
pub(crate) type TaskHandle = Uuid;

/// Unit of background work. Stored as the task row's `params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum TaskPayload {
    Launch { testcase_number: i64 },
    Monitor { remote_job_id: String },
    Report { remote_job_id: String },
    Sync { testcase_number: i64 },
    SyncAll,
    BulkReport,
    Reconcile,
    LaunchPending { limit: i64 },
}

impl TaskPayload {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            TaskPayload::Launch { .. } => "launch",
            TaskPayload::Monitor { .. } => "monitor",
            TaskPayload::Report { .. } => "report",
            TaskPayload::Sync { .. } => "sync",
            TaskPayload::SyncAll => "sync_all",
            TaskPayload::BulkReport => "bulk_report",
            TaskPayload::Reconcile => "reconcile",
            TaskPayload::LaunchPending { .. } => "launch_pending",
        }
    }
}

/// Externally visible task status. `retrying` is reported as `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl From<TaskStatus> for TaskState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending | TaskStatus::Retrying => TaskState::Pending,
            TaskStatus::Running => TaskState::Running,
            TaskStatus::Succeeded => TaskState::Succeeded,
            TaskStatus::Failed => TaskState::Failed,
        }
    }
}

/// Task status as served by `GET /v1/tasks/{task_id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TaskView {
    pub(crate) task_id: TaskHandle,
    pub(crate) kind: String,
    pub(crate) status: TaskState,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) attempts: i32,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl From<TaskRecord> for TaskView {
    fn from(record: TaskRecord) -> Self {
        Self {
            task_id: record.id,
            kind: record.kind,
            status: record.status.into(),
            result: record.result,
            error: record.error_message,
            attempts: record.retry_count,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}
