//! TaskDao trait - durable task queue rows

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SyncError;
use crate::store::models::{NewTask, TaskRecord};

#[async_trait]
pub(crate) trait TaskDao: Send + Sync {
    async fn insert_task(&self, task: &NewTask) -> Result<(), SyncError>;

    /// 実行可能なタスクを1件取り出して `running` にする (FOR UPDATE SKIP LOCKED)
    async fn claim_next_task(&self) -> Result<Option<TaskRecord>, SyncError>;

    async fn mark_task_succeeded(&self, task_id: Uuid, result: &Value) -> Result<(), SyncError>;

    /// retry_count を増やし、`run_after` 以降に再実行させる
    async fn mark_task_retrying(
        &self,
        task_id: Uuid,
        error: &str,
        run_after: DateTime<Utc>,
    ) -> Result<(), SyncError>;

    async fn mark_task_failed(&self, task_id: Uuid, error: &str) -> Result<(), SyncError>;

    async fn find_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, SyncError>;

    /// `started_before` より前から `running` のままのタスクを `retrying` に戻す。
    /// 再配信も1回の試行として数え、`max_retries` を使い切ったものは `failed` にする
    async fn requeue_stale_tasks(&self, started_before: DateTime<Utc>) -> Result<u64, SyncError>;

    /// pending / running / retrying の件数
    async fn count_open_tasks(&self) -> Result<i64, SyncError>;
}
