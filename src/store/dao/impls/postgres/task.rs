use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

use super::PgSyncDao;
use crate::error::SyncError;
use crate::store::dao::traits::TaskDao;
use crate::store::models::{NewTask, TaskRecord, TaskStatus};

const TASK_COLUMNS: &str = "id, kind, params, status, result, error_message, retry_count, \
     max_retries, run_after, created_at, started_at, completed_at";

#[async_trait]
impl TaskDao for PgSyncDao {
    async fn insert_task(&self, task: &NewTask) -> Result<(), SyncError> {
        sqlx::query(
            r"
            INSERT INTO sync_tasks (id, kind, params, status, max_retries, run_after)
            VALUES ($1, $2, $3, 'pending', $4, $5)
            ",
        )
        .bind(task.id)
        .bind(&task.kind)
        .bind(&task.params)
        .bind(task.max_retries)
        .bind(task.run_after)
        .execute(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to insert task"))?;

        Ok(())
    }

    async fn claim_next_task(&self) -> Result<Option<TaskRecord>, SyncError> {
        let row = sqlx::query(&format!(
            r"
            UPDATE sync_tasks
            SET status = 'running',
                started_at = NOW()
            WHERE id = (
                SELECT id
                FROM sync_tasks
                WHERE status IN ('pending', 'retrying')
                  AND run_after <= NOW()
                ORDER BY run_after ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {TASK_COLUMNS}
            "
        ))
        .fetch_optional(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to claim next task"))?;

        row.map(|row| row_to_task(&row)).transpose()
    }

    async fn mark_task_succeeded(&self, task_id: Uuid, result: &Value) -> Result<(), SyncError> {
        sqlx::query(
            r"
            UPDATE sync_tasks
            SET status = 'succeeded',
                result = $2,
                error_message = NULL,
                completed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .bind(result)
        .execute(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to mark task succeeded"))?;

        Ok(())
    }

    async fn mark_task_retrying(
        &self,
        task_id: Uuid,
        error: &str,
        run_after: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        sqlx::query(
            r"
            UPDATE sync_tasks
            SET status = 'retrying',
                error_message = $2,
                retry_count = retry_count + 1,
                run_after = $3,
                started_at = NULL
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .bind(error)
        .bind(run_after)
        .execute(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to mark task retrying"))?;

        Ok(())
    }

    async fn mark_task_failed(&self, task_id: Uuid, error: &str) -> Result<(), SyncError> {
        sqlx::query(
            r"
            UPDATE sync_tasks
            SET status = 'failed',
                error_message = $2,
                completed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(task_id)
        .bind(error)
        .execute(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to mark task failed"))?;

        Ok(())
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, SyncError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM sync_tasks WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to load task"))?;

        row.map(|row| row_to_task(&row)).transpose()
    }

    async fn requeue_stale_tasks(&self, started_before: DateTime<Utc>) -> Result<u64, SyncError> {
        let result = sqlx::query(
            r"
            UPDATE sync_tasks
            SET status = CASE WHEN retry_count < max_retries THEN 'retrying' ELSE 'failed' END,
                retry_count = LEAST(retry_count + 1, max_retries),
                error_message = 'worker lost while task was running',
                run_after = NOW(),
                started_at = CASE WHEN retry_count < max_retries THEN NULL ELSE started_at END,
                completed_at = CASE WHEN retry_count < max_retries THEN NULL ELSE NOW() END
            WHERE status = 'running'
              AND started_at < $1
            ",
        )
        .bind(started_before)
        .execute(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to requeue stale tasks"))?;

        Ok(result.rows_affected())
    }

    async fn count_open_tasks(&self) -> Result<i64, SyncError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_tasks WHERE status IN ('pending', 'running', 'retrying')",
        )
        .fetch_one(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to count open tasks"))?;

        Ok(count)
    }
}

fn row_to_task(row: &PgRow) -> Result<TaskRecord, SyncError> {
    let status: String = row.try_get("status")?;
    let status = TaskStatus::parse(&status).ok_or_else(|| {
        SyncError::Persistence(anyhow::anyhow!("invalid task status in store: {status}"))
    })?;

    Ok(TaskRecord {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        params: row.try_get("params")?,
        status,
        result: row.try_get("result")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        run_after: row.try_get("run_after")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}
