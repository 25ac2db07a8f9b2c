use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Local test case status. Always derived from the most recent job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TestCaseStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Blocked,
    Skipped,
}

impl TestCaseStatus {
    pub(crate) const ALL: [TestCaseStatus; 6] = [
        TestCaseStatus::Pending,
        TestCaseStatus::Running,
        TestCaseStatus::Passed,
        TestCaseStatus::Failed,
        TestCaseStatus::Blocked,
        TestCaseStatus::Skipped,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TestCaseStatus::Pending => "pending",
            TestCaseStatus::Running => "running",
            TestCaseStatus::Passed => "passed",
            TestCaseStatus::Failed => "failed",
            TestCaseStatus::Blocked => "blocked",
            TestCaseStatus::Skipped => "skipped",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TestCaseStatus::Pending),
            "running" => Some(TestCaseStatus::Running),
            "passed" => Some(TestCaseStatus::Passed),
            "failed" => Some(TestCaseStatus::Failed),
            "blocked" => Some(TestCaseStatus::Blocked),
            "skipped" => Some(TestCaseStatus::Skipped),
            _ => None,
        }
    }
}

impl AsRef<str> for TestCaseStatus {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct TestCase {
    pub(crate) id: i64,
    pub(crate) testcase_number: i64,
    pub(crate) name: String,
    pub(crate) preconditions: Option<String>,
    pub(crate) steps: Value,
    pub(crate) test_suite_id: Option<i64>,
    pub(crate) status: TestCaseStatus,
    pub(crate) active_job_id: Option<String>,
    pub(crate) last_job_id: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl TestCase {
    /// TestLink external id, e.g. `repo-tests-42`.
    pub(crate) fn external_id(&self, prefix: &str) -> String {
        external_id(prefix, self.testcase_number)
    }
}

pub(crate) fn external_id(prefix: &str, testcase_number: i64) -> String {
    format!("{prefix}-{testcase_number}")
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewTestCase {
    pub(crate) testcase_number: i64,
    pub(crate) name: String,
    pub(crate) preconditions: Option<String>,
    pub(crate) steps: Value,
    pub(crate) test_suite_id: Option<i64>,
}

/// One OpenQA job attempt for a test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Job {
    pub(crate) id: i64,
    pub(crate) testcase_id: i64,
    pub(crate) testcase_number: i64,
    pub(crate) remote_job_id: String,
    pub(crate) remote_status: String,
    pub(crate) remote_result: Option<String>,
    pub(crate) log_url: Option<String>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) terminal: bool,
    pub(crate) reported_at: Option<DateTime<Utc>>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Job {
    pub(crate) fn is_reported(&self) -> bool {
        self.reported_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewJob {
    pub(crate) remote_job_id: String,
    pub(crate) remote_status: String,
    pub(crate) log_url: Option<String>,
    pub(crate) started_at: Option<DateTime<Utc>>,
}

/// Intermediate fields observed while the remote job is still running.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JobProgress {
    pub(crate) remote_status: String,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) log_url: Option<String>,
}

/// Final remote state plus the test case status derived from it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TerminalObservation {
    pub(crate) remote_status: String,
    pub(crate) remote_result: String,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) log_url: Option<String>,
    pub(crate) testcase_status: TestCaseStatus,
}

/// Lifecycle of a row in the durable task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

impl TaskStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "succeeded" => Some(TaskStatus::Succeeded),
            "failed" => Some(TaskStatus::Failed),
            "retrying" => Some(TaskStatus::Retrying),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TaskRecord {
    pub(crate) id: Uuid,
    pub(crate) kind: String,
    pub(crate) params: Value,
    pub(crate) status: TaskStatus,
    pub(crate) result: Option<Value>,
    pub(crate) error_message: Option<String>,
    pub(crate) retry_count: i32,
    pub(crate) max_retries: i32,
    pub(crate) run_after: DateTime<Utc>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewTask {
    pub(crate) id: Uuid,
    pub(crate) kind: String,
    pub(crate) params: Value,
    pub(crate) max_retries: i32,
    pub(crate) run_after: DateTime<Utc>,
}
