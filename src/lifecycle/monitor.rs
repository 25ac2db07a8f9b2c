use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::mapper::{JobPhase, local_status};
use super::{ExecutionFarm, RemoteJob};
use crate::error::SyncError;
use crate::observability::metrics::Metrics;
use crate::store::dao::SyncDao;
use crate::store::models::{JobProgress, TerminalObservation, TestCaseStatus};
use crate::util::retry::RetryConfig;

const UNKNOWN_RESULT: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// Still running remotely. The caller schedules the next poll.
    Pending { remote_status: String },
    /// Terminal state recorded by this poll. A report must follow.
    Terminal {
        status: TestCaseStatus,
        result: String,
    },
    /// The job was already terminal. Nothing changed.
    AlreadyTerminal,
}

/// Single-shot poll of one OpenQA job.
pub(crate) struct JobMonitor {
    dao: Arc<dyn SyncDao>,
    farm: Arc<dyn ExecutionFarm>,
    retry: RetryConfig,
    metrics: Arc<Metrics>,
}

impl JobMonitor {
    pub(crate) fn new(
        dao: Arc<dyn SyncDao>,
        farm: Arc<dyn ExecutionFarm>,
        retry: RetryConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            dao,
            farm,
            retry,
            metrics,
        }
    }

    /// Fetches the remote state once and records what it finds.
    ///
    /// A failed fetch leaves the job row untouched so the poll can be retried.
    pub(crate) async fn poll(&self, remote_job_id: &str) -> Result<PollOutcome, SyncError> {
        let job = self
            .dao
            .find_job(remote_job_id)
            .await?
            .ok_or_else(|| SyncError::not_found("job", remote_job_id))?;

        if job.terminal {
            debug!(remote_job_id, "job already terminal, skipping poll");
            return Ok(PollOutcome::AlreadyTerminal);
        }

        let remote = self.fetch_with_retry(remote_job_id).await?;
        let phase = JobPhase::from_remote_state(&remote.state);

        if !phase.is_terminal() {
            self.dao
                .record_progress(
                    remote_job_id,
                    &JobProgress {
                        remote_status: remote.state.clone(),
                        started_at: remote.started_at,
                        log_url: remote.log_url.clone(),
                    },
                )
                .await?;
            debug!(
                remote_job_id,
                remote_status = %remote.state,
                phase = ?phase,
                "job still running"
            );
            return Ok(PollOutcome::Pending {
                remote_status: remote.state,
            });
        }

        let result = remote
            .result
            .clone()
            .unwrap_or_else(|| UNKNOWN_RESULT.to_string());
        let status = local_status(phase, Some(&result));
        let observation = TerminalObservation {
            remote_status: remote.state.clone(),
            remote_result: result.clone(),
            started_at: remote.started_at,
            finished_at: remote.finished_at,
            log_url: remote.log_url.clone(),
            testcase_status: status,
        };

        if !self.dao.record_terminal(remote_job_id, &observation).await? {
            debug!(remote_job_id, "terminal state recorded concurrently");
            return Ok(PollOutcome::AlreadyTerminal);
        }

        self.metrics.terminal_transitions.inc();
        info!(
            remote_job_id,
            testcase_number = job.testcase_number,
            remote_status = %remote.state,
            result = %result,
            status = status.as_str(),
            "job reached terminal state"
        );
        Ok(PollOutcome::Terminal { status, result })
    }

    async fn fetch_with_retry(&self, remote_job_id: &str) -> Result<RemoteJob, SyncError> {
        let mut attempt = 0;
        loop {
            self.metrics.polls.inc();
            match self.farm.fetch_job(remote_job_id).await {
                Ok(remote) => return Ok(remote),
                Err(error) => {
                    self.metrics.poll_failures.inc();
                    attempt += 1;
                    if !error.is_retryable() || !self.retry.can_retry(attempt) {
                        warn!(
                            remote_job_id,
                            attempt,
                            error = %error,
                            "giving up on OpenQA job fetch"
                        );
                        return Err(error);
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        remote_job_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "OpenQA job fetch failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
