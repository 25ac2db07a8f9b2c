//! PostgreSQL implementation of every DAO trait.

mod job;
mod task;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::SyncError;
use crate::store::dao::traits::{SyncDao, TestCaseDao};
use crate::store::models::{Job, NewTestCase, TestCase, TestCaseStatus};

const TEST_CASE_COLUMNS: &str = "id, testcase_number, name, preconditions, steps, test_suite_id, \
     status, active_job_id, last_job_id, created_at, updated_at";

const JOB_COLUMNS: &str = "j.id, j.testcase_id, c.testcase_number, j.remote_job_id, \
     j.remote_status, j.remote_result, j.log_url, j.started_at, j.finished_at, j.terminal, \
     j.reported_at, j.created_at, j.updated_at";

#[derive(Debug, Clone)]
pub(crate) struct PgSyncDao {
    pool: PgPool,
}

impl PgSyncDao {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SyncDao for PgSyncDao {
    async fn ping(&self) -> Result<(), SyncError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| SyncError::persistence(error, "database ping failed"))?;
        Ok(())
    }
}

#[async_trait]
impl TestCaseDao for PgSyncDao {
    async fn insert_test_case_if_absent(&self, case: &NewTestCase) -> Result<bool, SyncError> {
        let result = sqlx::query(
            r"
            INSERT INTO test_cases
                (testcase_number, name, preconditions, steps, test_suite_id, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (testcase_number) DO NOTHING
            ",
        )
        .bind(case.testcase_number)
        .bind(&case.name)
        .bind(case.preconditions.as_deref())
        .bind(&case.steps)
        .bind(case.test_suite_id)
        .execute(&self.pool)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to insert test case"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_test_cases(&self) -> Result<i64, SyncError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test_cases")
            .fetch_one(&self.pool)
            .await
            .map_err(|error| SyncError::persistence(error, "failed to count test cases"))?;
        Ok(count)
    }

    async fn find_test_case_by_number(
        &self,
        testcase_number: i64,
    ) -> Result<Option<TestCase>, SyncError> {
        let row = sqlx::query(&format!(
            "SELECT {TEST_CASE_COLUMNS} FROM test_cases WHERE testcase_number = $1"
        ))
        .bind(testcase_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to load test case"))?;

        row.map(|row| row_to_test_case(&row)).transpose()
    }

    async fn list_test_cases(
        &self,
        status: Option<TestCaseStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TestCase>, SyncError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {TEST_CASE_COLUMNS}
            FROM test_cases
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY testcase_number ASC
            OFFSET $2
            LIMIT $3
            "
        ))
        .bind(status.map(TestCaseStatus::as_str))
        .bind(offset.max(0))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to list test cases"))?;

        rows.iter().map(row_to_test_case).collect()
    }

    async fn count_by_status(&self) -> Result<Vec<(TestCaseStatus, i64)>, SyncError> {
        let rows = sqlx::query(
            r"
            SELECT status, COUNT(*) AS count
            FROM test_cases
            GROUP BY status
            ORDER BY status
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| SyncError::persistence(error, "failed to count test cases by status"))?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            counts.push((parse_test_case_status(&status)?, count));
        }
        Ok(counts)
    }
}

fn parse_test_case_status(value: &str) -> Result<TestCaseStatus, SyncError> {
    TestCaseStatus::parse(value).ok_or_else(|| {
        SyncError::Persistence(anyhow::anyhow!("invalid test case status in store: {value}"))
    })
}

pub(super) fn row_to_test_case(row: &PgRow) -> Result<TestCase, SyncError> {
    let status: String = row.try_get("status")?;

    Ok(TestCase {
        id: row.try_get("id")?,
        testcase_number: row.try_get("testcase_number")?,
        name: row.try_get("name")?,
        preconditions: row.try_get("preconditions")?,
        steps: row.try_get("steps")?,
        test_suite_id: row.try_get("test_suite_id")?,
        status: parse_test_case_status(&status)?,
        active_job_id: row.try_get("active_job_id")?,
        last_job_id: row.try_get("last_job_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(super) fn row_to_job(row: &PgRow) -> Result<Job, SyncError> {
    Ok(Job {
        id: row.try_get("id")?,
        testcase_id: row.try_get("testcase_id")?,
        testcase_number: row.try_get("testcase_number")?,
        remote_job_id: row.try_get("remote_job_id")?,
        remote_status: row.try_get("remote_status")?,
        remote_result: row.try_get("remote_result")?,
        log_url: row.try_get("log_url")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        terminal: row.try_get("terminal")?,
        reported_at: row.try_get("reported_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
