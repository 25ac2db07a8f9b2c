use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, Transaction};
use tracing::debug;

use super::{JOB_COLUMNS, PgSyncDao, TEST_CASE_COLUMNS, row_to_job, row_to_test_case};
use crate::error::SyncError;
use crate::store::dao::traits::{JobDao, LaunchClaim, ReportClaim};
use crate::store::models::{Job, JobProgress, NewJob, TerminalObservation, TestCase};
use crate::util::idempotency::{LAUNCH_NAMESPACE, REPORT_NAMESPACE, lock_key, try_acquire_lock};

struct PgLaunchClaim {
    tx: Transaction<'static, Postgres>,
    test_case: TestCase,
    active_job: Option<Job>,
}

#[async_trait]
impl LaunchClaim for PgLaunchClaim {
    fn test_case(&self) -> &TestCase {
        &self.test_case
    }

    fn active_job(&self) -> Option<&Job> {
        self.active_job.as_ref()
    }

    async fn commit(self: Box<Self>, job: NewJob) -> Result<Job, SyncError> {
        let PgLaunchClaim {
            mut tx, test_case, ..
        } = *self;

        let job_id: i64 = sqlx::query_scalar(
            r"
            INSERT INTO test_jobs
                (testcase_id, remote_job_id, remote_status, log_url, started_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            ",
        )
        .bind(test_case.id)
        .bind(&job.remote_job_id)
        .bind(&job.remote_status)
        .bind(job.log_url.as_deref())
        .bind(job.started_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|error| conflict_or_persistence(error, &job.remote_job_id))?;

        sqlx::query(
            r"
            UPDATE test_cases
            SET status = 'running',
                active_job_id = $2,
                last_job_id = $2,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(test_case.id)
        .bind(&job.remote_job_id)
        .execute(&mut *tx)
        .await
        .map_err(|error| conflict_or_persistence(error, &job.remote_job_id))?;

        let stored = fetch_job_by_id(&mut *tx, job_id).await?;

        tx.commit()
            .await
            .map_err(|error| SyncError::persistence(error, "failed to commit launch"))?;

        Ok(stored)
    }
}

struct PgReportClaim {
    tx: Transaction<'static, Postgres>,
    job: Job,
}

#[async_trait]
impl ReportClaim for PgReportClaim {
    fn job(&self) -> &Job {
        &self.job
    }

    async fn mark_reported(self: Box<Self>) -> Result<bool, SyncError> {
        let PgReportClaim { mut tx, job } = *self;

        let result = sqlx::query(
            r"
            UPDATE test_jobs
            SET reported_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND terminal
              AND reported_at IS NULL
            ",
        )
        .bind(job.id)
        .execute(&mut *tx)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to mark job reported"))?;

        tx.commit()
            .await
            .map_err(|error| SyncError::persistence(error, "failed to commit report marker"))?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl JobDao for PgSyncDao {
    async fn begin_launch(
        &self,
        testcase_number: i64,
    ) -> Result<Option<Box<dyn LaunchClaim>>, SyncError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|error| SyncError::persistence(error, "failed to begin transaction"))?;

        let key = lock_key(LAUNCH_NAMESPACE, &testcase_number.to_string());
        let acquired = try_acquire_lock(&mut *tx, key)
            .await
            .map_err(|error| SyncError::persistence(error, "failed to acquire launch lock"))?;

        if !acquired {
            debug!(testcase_number, "launch lock held by another worker");
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "SELECT {TEST_CASE_COLUMNS} FROM test_cases WHERE testcase_number = $1"
        ))
        .bind(testcase_number)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to load test case"))?;

        let Some(row) = row else {
            return Err(SyncError::not_found("test case", testcase_number));
        };
        let test_case = row_to_test_case(&row)?;

        let active_row = sqlx::query(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM test_jobs j
            JOIN test_cases c ON c.id = j.testcase_id
            WHERE j.testcase_id = $1
              AND NOT j.terminal
            "
        ))
        .bind(test_case.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to load active job"))?;

        let active_job = active_row.map(|row| row_to_job(&row)).transpose()?;

        Ok(Some(Box::new(PgLaunchClaim {
            tx,
            test_case,
            active_job,
        })))
    }

    async fn find_job(&self, remote_job_id: &str) -> Result<Option<Job>, SyncError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM test_jobs j
            JOIN test_cases c ON c.id = j.testcase_id
            WHERE j.remote_job_id = $1
            "
        ))
        .bind(remote_job_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to load job"))?;

        row.map(|row| row_to_job(&row)).transpose()
    }

    async fn record_progress(
        &self,
        remote_job_id: &str,
        progress: &JobProgress,
    ) -> Result<bool, SyncError> {
        let result = sqlx::query(
            r"
            UPDATE test_jobs
            SET remote_status = $2,
                started_at = COALESCE(started_at, $3),
                log_url = COALESCE($4, log_url),
                updated_at = NOW()
            WHERE remote_job_id = $1
              AND NOT terminal
            ",
        )
        .bind(remote_job_id)
        .bind(&progress.remote_status)
        .bind(progress.started_at)
        .bind(progress.log_url.as_deref())
        .execute(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to record job progress"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_terminal(
        &self,
        remote_job_id: &str,
        observation: &TerminalObservation,
    ) -> Result<bool, SyncError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|error| SyncError::persistence(error, "failed to begin transaction"))?;

        let testcase_id: Option<i64> = sqlx::query_scalar(
            r"
            UPDATE test_jobs
            SET remote_status = $2,
                remote_result = $3,
                started_at = COALESCE(started_at, $4),
                finished_at = COALESCE($5, finished_at, NOW()),
                log_url = COALESCE($6, log_url),
                terminal = TRUE,
                updated_at = NOW()
            WHERE remote_job_id = $1
              AND NOT terminal
            RETURNING testcase_id
            ",
        )
        .bind(remote_job_id)
        .bind(&observation.remote_status)
        .bind(&observation.remote_result)
        .bind(observation.started_at)
        .bind(observation.finished_at)
        .bind(observation.log_url.as_deref())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to record terminal state"))?;

        let Some(testcase_id) = testcase_id else {
            return Ok(false);
        };

        // Only the most recent job drives the test case status.
        sqlx::query(
            r"
            UPDATE test_cases
            SET status = $3,
                active_job_id = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND last_job_id = $2
            ",
        )
        .bind(testcase_id)
        .bind(remote_job_id)
        .bind(observation.testcase_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to update test case status"))?;

        tx.commit()
            .await
            .map_err(|error| SyncError::persistence(error, "failed to commit terminal state"))?;

        Ok(true)
    }

    async fn begin_report(
        &self,
        remote_job_id: &str,
    ) -> Result<Option<Box<dyn ReportClaim>>, SyncError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|error| SyncError::persistence(error, "failed to begin transaction"))?;

        let key = lock_key(REPORT_NAMESPACE, remote_job_id);
        let acquired = try_acquire_lock(&mut *tx, key)
            .await
            .map_err(|error| SyncError::persistence(error, "failed to acquire report lock"))?;

        if !acquired {
            debug!(remote_job_id, "report lock held by another worker");
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM test_jobs j
            JOIN test_cases c ON c.id = j.testcase_id
            WHERE j.remote_job_id = $1
            "
        ))
        .bind(remote_job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to load job"))?;

        let Some(row) = row else {
            return Err(SyncError::not_found("job", remote_job_id));
        };
        let job = row_to_job(&row)?;

        Ok(Some(Box::new(PgReportClaim { tx, job })))
    }

    async fn unreported_terminal_jobs(&self, limit: i64) -> Result<Vec<Job>, SyncError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM test_jobs j
            JOIN test_cases c ON c.id = j.testcase_id
            WHERE j.terminal
              AND j.reported_at IS NULL
            ORDER BY j.finished_at ASC NULLS LAST, j.id ASC
            LIMIT $1
            "
        ))
        .bind(limit.max(0))
        .fetch_all(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to list unreported jobs"))?;

        rows.iter().map(row_to_job).collect()
    }

    async fn unmonitored_active_jobs(&self) -> Result<Vec<Job>, SyncError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM test_jobs j
            JOIN test_cases c ON c.id = j.testcase_id
            WHERE NOT j.terminal
              AND NOT EXISTS (
                  SELECT 1
                  FROM sync_tasks t
                  WHERE t.kind = 'monitor'
                    AND t.params ->> 'remote_job_id' = j.remote_job_id
                    AND t.status IN ('pending', 'running', 'retrying')
              )
            ORDER BY j.id ASC
            "
        ))
        .fetch_all(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to list unmonitored jobs"))?;

        rows.iter().map(row_to_job).collect()
    }

    async fn count_jobs(&self) -> Result<i64, SyncError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test_jobs")
            .fetch_one(self.pool())
            .await
            .map_err(|error| SyncError::persistence(error, "failed to count jobs"))?;
        Ok(count)
    }

    async fn count_unreported_jobs(&self) -> Result<i64, SyncError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM test_jobs WHERE terminal AND reported_at IS NULL",
        )
        .fetch_one(self.pool())
        .await
        .map_err(|error| SyncError::persistence(error, "failed to count unreported jobs"))?;
        Ok(count)
    }
}

async fn fetch_job_by_id(conn: &mut PgConnection, job_id: i64) -> Result<Job, SyncError> {
    let row = sqlx::query(&format!(
        r"
        SELECT {JOB_COLUMNS}
        FROM test_jobs j
        JOIN test_cases c ON c.id = j.testcase_id
        WHERE j.id = $1
        "
    ))
    .bind(job_id)
    .fetch_one(conn)
    .await
    .map_err(|error| SyncError::persistence(error, "failed to reload job"))?;

    row_to_job(&row)
}

fn conflict_or_persistence(error: sqlx::Error, remote_job_id: &str) -> SyncError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.is_unique_violation() {
            return SyncError::StateConflict(format!(
                "job {remote_job_id} collides with an existing job or active slot"
            ));
        }
    }
    SyncError::persistence(error, "failed to persist launched job")
}
