use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::types::{TaskHandle, TaskPayload, TaskView};
use crate::error::SyncError;
use crate::store::dao::SyncDao;
use crate::store::models::{NewTask, TaskRecord};

/// Persistent task rows behind the queue (`sync_tasks`).
#[derive(Clone)]
pub(crate) struct QueueStore {
    dao: Arc<dyn SyncDao>,
}

impl QueueStore {
    pub(crate) fn new(dao: Arc<dyn SyncDao>) -> Self {
        Self { dao }
    }

    /// Insert a new task that becomes claimable after `delay`
    pub(crate) async fn enqueue(
        &self,
        payload: &TaskPayload,
        max_retries: i32,
        delay: Duration,
    ) -> Result<TaskHandle, SyncError> {
        let params = serde_json::to_value(payload)
            .map_err(|error| SyncError::persistence(error, "failed to encode task payload"))?;
        let task = NewTask {
            id: Uuid::now_v7(),
            kind: payload.kind().to_string(),
            params,
            max_retries,
            run_after: Utc::now() + to_delta(delay),
        };
        self.dao.insert_task(&task).await?;
        Ok(task.id)
    }

    /// Pick the next due pending or retrying task (FOR UPDATE SKIP LOCKED)
    pub(crate) async fn claim(&self) -> Result<Option<TaskRecord>, SyncError> {
        self.dao.claim_next_task().await
    }

    pub(crate) async fn mark_succeeded(
        &self,
        task_id: TaskHandle,
        result: &Value,
    ) -> Result<(), SyncError> {
        self.dao.mark_task_succeeded(task_id, result).await
    }

    /// Mark a task as retrying (increment retry_count) and delay its next claim
    pub(crate) async fn mark_retrying(
        &self,
        task_id: TaskHandle,
        error: &str,
        delay: Duration,
    ) -> Result<(), SyncError> {
        self.dao
            .mark_task_retrying(task_id, error, Utc::now() + to_delta(delay))
            .await
    }

    pub(crate) async fn mark_failed(&self, task_id: TaskHandle, error: &str) -> Result<(), SyncError> {
        self.dao.mark_task_failed(task_id, error).await
    }

    pub(crate) async fn status(&self, task_id: TaskHandle) -> Result<Option<TaskView>, SyncError> {
        Ok(self.dao.find_task(task_id).await?.map(TaskView::from))
    }

    /// Tasks left `running` by a lost worker go back to `retrying`, or to
    /// `failed` once their retries are used up. Returns how many were touched.
    pub(crate) async fn requeue_stale(&self, older_than: Duration) -> Result<u64, SyncError> {
        self.dao
            .requeue_stale_tasks(Utc::now() - to_delta(older_than))
            .await
    }

    pub(crate) async fn open_count(&self) -> Result<i64, SyncError> {
        self.dao.count_open_tasks().await
    }
}

/// Delays are capped at ten years so timestamp arithmetic cannot overflow.
fn to_delta(duration: Duration) -> TimeDelta {
    let cap = TimeDelta::days(3650);
    TimeDelta::from_std(duration)
        .ok()
        .filter(|delta| *delta < cap)
        .unwrap_or(cap)
}
