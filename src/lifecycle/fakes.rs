// Scripted remotes for lifecycle tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use super::{
    ExecutionFarm, JobRequest, RemoteJob, ResultReport, TestCaseDefinition, TestRepository,
};
use crate::config::ExecutionProfile;
use crate::error::{OPENQA, SyncError, TESTLINK};
use crate::observability::Telemetry;
use crate::observability::metrics::Metrics;

pub(crate) fn test_metrics() -> Arc<Metrics> {
    Telemetry::metrics_only()
        .expect("telemetry should build")
        .metrics()
}

pub(crate) fn test_profile() -> ExecutionProfile {
    ExecutionProfile {
        iso: "ALT-latest.iso".into(),
        distri: "ALT".into(),
        version: "p10".into(),
        flavor: "Server".into(),
        arch: "x86_64".into(),
        machine: "uefi".into(),
    }
}

pub(crate) fn remote_job(id: &str, state: &str, result: Option<&str>) -> RemoteJob {
    RemoteJob {
        id: id.to_string(),
        state: state.to_string(),
        result: result.map(str::to_string),
        started_at: None,
        finished_at: None,
        log_url: Some(format!("http://openqa.test/tests/{id}")),
    }
}

fn clone_error(error: &SyncError) -> SyncError {
    match error {
        SyncError::RemoteUnavailable { system, message } => SyncError::RemoteUnavailable {
            system: *system,
            message: message.clone(),
        },
        SyncError::RemoteRejected {
            system,
            status,
            body,
        } => SyncError::RemoteRejected {
            system: *system,
            status: *status,
            body: body.clone(),
        },
        SyncError::InvalidResponse { system, message } => SyncError::InvalidResponse {
            system: *system,
            message: message.clone(),
        },
        SyncError::NotFound { entity, key } => SyncError::NotFound {
            entity: *entity,
            key: key.clone(),
        },
        SyncError::StateConflict(message) => SyncError::StateConflict(message.clone()),
        SyncError::Persistence(error) => SyncError::Persistence(anyhow::anyhow!("{error:#}")),
    }
}

#[derive(Default)]
struct FarmState {
    ids: VecDeque<String>,
    submitted: Vec<JobRequest>,
    submit_error: Option<SyncError>,
    states: HashMap<String, VecDeque<RemoteJob>>,
    fetch_failures: HashMap<String, usize>,
    fetches: usize,
    by_test: HashMap<String, Vec<RemoteJob>>,
}

/// Execution farm that hands out ids and replays scripted job states.
#[derive(Default)]
pub(crate) struct FakeFarm {
    state: Mutex<FarmState>,
}

impl FakeFarm {
    pub(crate) fn with_ids<const N: usize>(ids: [&str; N]) -> Self {
        let farm = Self::default();
        farm.state
            .lock()
            .expect("farm state")
            .ids
            .extend(ids.iter().map(|id| (*id).to_string()));
        farm
    }

    pub(crate) fn push_id(&self, id: &str) {
        self.state
            .lock()
            .expect("farm state")
            .ids
            .push_back(id.to_string());
    }

    pub(crate) fn submitted(&self) -> Vec<JobRequest> {
        self.state.lock().expect("farm state").submitted.clone()
    }

    pub(crate) fn fail_submissions(&self, error: SyncError) {
        self.state.lock().expect("farm state").submit_error = Some(error);
    }

    /// Queues states returned by successive fetches. The last one repeats.
    pub(crate) fn script(&self, remote_job_id: &str, states: Vec<RemoteJob>) {
        self.state
            .lock()
            .expect("farm state")
            .states
            .insert(remote_job_id.to_string(), states.into());
    }

    /// The next `count` fetches of this job fail as unavailable.
    pub(crate) fn fail_fetches(&self, remote_job_id: &str, count: usize) {
        self.state
            .lock()
            .expect("farm state")
            .fetch_failures
            .insert(remote_job_id.to_string(), count);
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.state.lock().expect("farm state").fetches
    }

    pub(crate) fn list_for_test(&self, test_name: &str, jobs: Vec<RemoteJob>) {
        self.state
            .lock()
            .expect("farm state")
            .by_test
            .insert(test_name.to_string(), jobs);
    }
}

#[async_trait]
impl ExecutionFarm for FakeFarm {
    async fn submit_job(&self, request: &JobRequest) -> Result<String, SyncError> {
        let mut state = self.state.lock().expect("farm state");
        if let Some(error) = &state.submit_error {
            return Err(clone_error(error));
        }
        let id = state.ids.pop_front().ok_or_else(|| SyncError::RemoteRejected {
            system: OPENQA,
            status: 400,
            body: "no scripted job id left".into(),
        })?;
        state.submitted.push(request.clone());
        Ok(id)
    }

    async fn fetch_job(&self, remote_job_id: &str) -> Result<RemoteJob, SyncError> {
        let mut state = self.state.lock().expect("farm state");
        state.fetches += 1;
        if let Some(remaining) = state.fetch_failures.get_mut(remote_job_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::RemoteUnavailable {
                    system: OPENQA,
                    message: "timed out".into(),
                });
            }
        }
        let Some(queue) = state.states.get_mut(remote_job_id) else {
            return Err(SyncError::not_found("openqa job", remote_job_id));
        };
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.ok_or_else(|| SyncError::not_found("openqa job", remote_job_id))
    }

    async fn find_jobs_by_test(&self, test_name: &str) -> Result<Vec<RemoteJob>, SyncError> {
        Ok(self
            .state
            .lock()
            .expect("farm state")
            .by_test
            .get(test_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

#[derive(Default)]
struct RepositoryState {
    definitions: HashMap<String, TestCaseDefinition>,
    reports: Vec<ResultReport>,
    rejected: HashSet<String>,
    fetches: usize,
}

/// Test repository that serves fixed definitions and records reports.
#[derive(Default)]
pub(crate) struct FakeRepository {
    state: Mutex<RepositoryState>,
}

impl FakeRepository {
    pub(crate) fn define(&self, external_id: &str, name: &str) {
        self.state.lock().expect("repository state").definitions.insert(
            external_id.to_string(),
            TestCaseDefinition {
                name: name.to_string(),
                preconditions: Some("clean VM".into()),
                steps: json!([{"step_number": 1, "actions": "boot"}]),
                suite_id: Some(5),
            },
        );
    }

    /// Reports for this external id are rejected with a 5xx.
    pub(crate) fn reject_reports_for(&self, external_id: &str) {
        self.state
            .lock()
            .expect("repository state")
            .rejected
            .insert(external_id.to_string());
    }

    pub(crate) fn accept_all_reports(&self) {
        self.state.lock().expect("repository state").rejected.clear();
    }

    pub(crate) fn reports(&self) -> Vec<ResultReport> {
        self.state.lock().expect("repository state").reports.clone()
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.state.lock().expect("repository state").fetches
    }
}

#[async_trait]
impl TestRepository for FakeRepository {
    async fn fetch_test_case(&self, external_id: &str) -> Result<TestCaseDefinition, SyncError> {
        let mut state = self.state.lock().expect("repository state");
        state.fetches += 1;
        state
            .definitions
            .get(external_id)
            .cloned()
            .ok_or_else(|| SyncError::not_found("testlink test case", external_id))
    }

    async fn resolve_plan_id(&self) -> Result<i64, SyncError> {
        Ok(7)
    }

    async fn report_result(&self, report: &ResultReport) -> Result<(), SyncError> {
        let mut state = self.state.lock().expect("repository state");
        if state.rejected.contains(&report.external_id) {
            return Err(SyncError::RemoteUnavailable {
                system: TESTLINK,
                message: "503 Service Unavailable".into(),
            });
        }
        state.reports.push(report.clone());
        Ok(())
    }
}
