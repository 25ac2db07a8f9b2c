//! Job lifecycle engine: launch, monitor, map, report and sync.
//!
//! Remote systems are reached only through [`ExecutionFarm`] and
//! [`TestRepository`], so the engine runs unchanged against the HTTP clients
//! and against scripted fakes in tests.

mod coordinator;
mod launcher;
mod mapper;
mod monitor;
mod reporter;

#[cfg(test)]
pub(crate) mod fakes;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::ExecutionProfile;
use crate::error::SyncError;
use crate::store::models::TestCase;

pub(crate) use coordinator::SyncCoordinator;
pub(crate) use launcher::{JobLauncher, LaunchOutcome};
pub(crate) use mapper::UpstreamCode;
pub(crate) use monitor::{JobMonitor, PollOutcome};
pub(crate) use reporter::{ReportOutcome, ResultReporter};

const MAX_TEST_NAME_LEN: usize = 96;

/// Body of an OpenQA job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct JobRequest {
    pub(crate) iso: String,
    pub(crate) distri: String,
    pub(crate) version: String,
    pub(crate) flavor: String,
    pub(crate) arch: String,
    pub(crate) test: String,
    pub(crate) machine: String,
}

impl JobRequest {
    pub(crate) fn for_test_case(profile: &ExecutionProfile, case: &TestCase) -> Self {
        Self {
            iso: profile.iso.clone(),
            distri: profile.distri.clone(),
            version: profile.version.clone(),
            flavor: profile.flavor.clone(),
            arch: profile.arch.clone(),
            test: test_name(case),
            machine: profile.machine.clone(),
        }
    }
}

/// Deterministic OpenQA test name for a test case: `testlink_{name}_{id}`.
///
/// Reconciliation relies on this being stable to find orphaned remote jobs.
pub(crate) fn test_name(case: &TestCase) -> String {
    let mut sanitized: String = case
        .name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    sanitized.truncate(MAX_TEST_NAME_LEN);
    format!("testlink_{sanitized}_{}", case.id)
}

/// Remote job as reported by the execution farm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteJob {
    pub(crate) id: String,
    pub(crate) state: String,
    pub(crate) result: Option<String>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
    pub(crate) log_url: Option<String>,
}

/// Test case content pulled from the repository.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TestCaseDefinition {
    pub(crate) name: String,
    pub(crate) preconditions: Option<String>,
    pub(crate) steps: Value,
    pub(crate) suite_id: Option<i64>,
}

/// A single result submission to the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResultReport {
    pub(crate) external_id: String,
    pub(crate) plan_id: i64,
    pub(crate) code: UpstreamCode,
    pub(crate) notes: String,
}

/// Execution farm (OpenQA).
#[async_trait]
pub(crate) trait ExecutionFarm: Send + Sync {
    /// Submits a job and returns the id assigned by the farm.
    async fn submit_job(&self, request: &JobRequest) -> Result<String, SyncError>;

    async fn fetch_job(&self, remote_job_id: &str) -> Result<RemoteJob, SyncError>;

    /// Jobs scheduled under the given test name, newest first.
    async fn find_jobs_by_test(&self, test_name: &str) -> Result<Vec<RemoteJob>, SyncError>;

    async fn ping(&self) -> Result<(), SyncError>;
}

/// Test case repository (TestLink).
#[async_trait]
pub(crate) trait TestRepository: Send + Sync {
    async fn fetch_test_case(&self, external_id: &str) -> Result<TestCaseDefinition, SyncError>;

    /// Test plan that receives execution results.
    async fn resolve_plan_id(&self) -> Result<i64, SyncError>;

    async fn report_result(&self, report: &ResultReport) -> Result<(), SyncError>;
}
