use std::sync::Arc;

use tracing::{error, info, warn};

use super::{ExecutionFarm, JobRequest, RemoteJob};
use crate::config::ExecutionProfile;
use crate::error::SyncError;
use crate::observability::metrics::Metrics;
use crate::store::dao::SyncDao;
use crate::store::models::{Job, NewJob};

const SUBMITTED_STATE: &str = "scheduled";

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LaunchOutcome {
    /// A new remote job was accepted and recorded.
    Launched(Job),
    /// An existing remote job with no local record was recorded instead.
    Adopted(Job),
    /// The test case already has a non-terminal job. Nothing was submitted.
    AlreadyActive(Job),
    /// Another worker holds the launch claim for this test case.
    InProgress,
}

impl LaunchOutcome {
    pub(crate) fn job(&self) -> Option<&Job> {
        match self {
            LaunchOutcome::Launched(job)
            | LaunchOutcome::Adopted(job)
            | LaunchOutcome::AlreadyActive(job) => Some(job),
            LaunchOutcome::InProgress => None,
        }
    }
}

/// Creates OpenQA jobs, at most one active per test case.
pub(crate) struct JobLauncher {
    dao: Arc<dyn SyncDao>,
    farm: Arc<dyn ExecutionFarm>,
    profile: ExecutionProfile,
    metrics: Arc<Metrics>,
}

impl JobLauncher {
    pub(crate) fn new(
        dao: Arc<dyn SyncDao>,
        farm: Arc<dyn ExecutionFarm>,
        profile: ExecutionProfile,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            dao,
            farm,
            profile,
            metrics,
        }
    }

    /// Submits a job for the test case and records it.
    ///
    /// The claim transaction spans the remote calls. A remote job already
    /// scheduled under the test name but never recorded locally is adopted
    /// instead of submitting another one. If submission fails the claim is
    /// dropped and the test case stays exactly as it was.
    pub(crate) async fn launch(&self, testcase_number: i64) -> Result<LaunchOutcome, SyncError> {
        let Some(claim) = self.dao.begin_launch(testcase_number).await? else {
            self.metrics.launch_conflicts.inc();
            return Ok(LaunchOutcome::InProgress);
        };

        if let Some(active) = claim.active_job() {
            self.metrics.launch_conflicts.inc();
            info!(
                testcase_number,
                remote_job_id = %active.remote_job_id,
                "test case already has an active job"
            );
            return Ok(LaunchOutcome::AlreadyActive(active.clone()));
        }

        let request = JobRequest::for_test_case(&self.profile, claim.test_case());
        if let Some(orphan) = self.find_orphan(&request.test).await? {
            let job = claim.commit(adopted_job(&orphan)).await?;
            info!(
                testcase_number,
                remote_job_id = %job.remote_job_id,
                remote_status = %orphan.state,
                "adopted unrecorded OpenQA job instead of submitting"
            );
            return Ok(LaunchOutcome::Adopted(job));
        }

        let remote_job_id = match self.farm.submit_job(&request).await {
            Ok(id) => id,
            Err(error) => {
                warn!(
                    testcase_number,
                    test = %request.test,
                    error = %error,
                    "OpenQA job submission failed"
                );
                return Err(error);
            }
        };

        let job = NewJob {
            remote_job_id: remote_job_id.clone(),
            remote_status: SUBMITTED_STATE.to_string(),
            log_url: None,
            started_at: None,
        };

        match claim.commit(job).await {
            Ok(job) => {
                self.metrics.launches.inc();
                info!(
                    testcase_number,
                    remote_job_id = %job.remote_job_id,
                    test = %request.test,
                    "OpenQA job launched"
                );
                Ok(LaunchOutcome::Launched(job))
            }
            Err(error) => {
                // Reconciliation adopts the remote job by its test name.
                error!(
                    testcase_number,
                    remote_job_id = %remote_job_id,
                    test = %request.test,
                    error = %error,
                    "OpenQA accepted the job but recording it failed; left for reconciliation"
                );
                Err(error)
            }
        }
    }

    /// Records an already existing remote job as the test case's active job.
    pub(crate) async fn adopt(
        &self,
        testcase_number: i64,
        remote: &RemoteJob,
    ) -> Result<LaunchOutcome, SyncError> {
        let Some(claim) = self.dao.begin_launch(testcase_number).await? else {
            return Ok(LaunchOutcome::InProgress);
        };

        if let Some(active) = claim.active_job() {
            return Ok(LaunchOutcome::AlreadyActive(active.clone()));
        }

        let job = claim.commit(adopted_job(remote)).await?;

        info!(
            testcase_number,
            remote_job_id = %job.remote_job_id,
            remote_status = %remote.state,
            "adopted orphaned OpenQA job"
        );
        Ok(LaunchOutcome::Adopted(job))
    }

    /// The newest remote job under `test`, if it has no local record.
    ///
    /// Jobs older than a recorded one belong to earlier attempts and are never
    /// orphans. A terminal orphan is still returned: its first poll records the
    /// result.
    pub(crate) async fn find_orphan(&self, test: &str) -> Result<Option<RemoteJob>, SyncError> {
        let Some(newest) = self.farm.find_jobs_by_test(test).await?.into_iter().next() else {
            return Ok(None);
        };
        if self.dao.find_job(&newest.id).await?.is_some() {
            return Ok(None);
        }
        Ok(Some(newest))
    }
}

fn adopted_job(remote: &RemoteJob) -> NewJob {
    NewJob {
        remote_job_id: remote.id.clone(),
        remote_status: remote.state.clone(),
        log_url: remote.log_url.clone(),
        started_at: remote.started_at,
    }
}
