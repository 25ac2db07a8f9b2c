use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::mapper::{UpstreamCode, upstream_code};
use super::{ResultReport, TestRepository};
use crate::error::SyncError;
use crate::observability::metrics::Metrics;
use crate::store::dao::SyncDao;
use crate::store::models::{Job, external_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReportOutcome {
    Reported { code: UpstreamCode },
    AlreadyReported,
    /// 他のワーカーが同じジョブを報告中
    InProgress,
    NotTerminal,
}

/// バルク報告の集計結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct BulkReport {
    pub(crate) attempted: usize,
    pub(crate) reported: usize,
    pub(crate) failed: usize,
}

/// 終端結果を TestLink に報告する（ジョブごとに1回だけ）
pub(crate) struct ResultReporter {
    dao: Arc<dyn SyncDao>,
    repository: Arc<dyn TestRepository>,
    key_prefix: String,
    metrics: Arc<Metrics>,
}

impl ResultReporter {
    pub(crate) fn new(
        dao: Arc<dyn SyncDao>,
        repository: Arc<dyn TestRepository>,
        key_prefix: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            dao,
            repository,
            key_prefix: key_prefix.into(),
            metrics,
        }
    }

    /// 終端ジョブを報告し、報告済みマーカーを立てる。
    ///
    /// 上流への送信は報告クレームを保持したまま行うため、
    /// 同じジョブへの同時呼び出しでも上流リクエストは1回になる。
    pub(crate) async fn report(&self, remote_job_id: &str) -> Result<ReportOutcome, SyncError> {
        let Some(claim) = self.dao.begin_report(remote_job_id).await? else {
            debug!(remote_job_id, "report already in progress elsewhere");
            return Ok(ReportOutcome::InProgress);
        };

        let job = claim.job();
        if !job.terminal {
            return Ok(ReportOutcome::NotTerminal);
        }
        if job.is_reported() {
            debug!(remote_job_id, "job already reported");
            return Ok(ReportOutcome::AlreadyReported);
        }

        let result = job.remote_result.as_deref().unwrap_or("none");
        let code = upstream_code(result);
        let report = ResultReport {
            external_id: external_id(&self.key_prefix, job.testcase_number),
            plan_id: self.repository.resolve_plan_id().await?,
            code,
            notes: notes(job, result),
        };

        if let Err(error) = self.repository.report_result(&report).await {
            self.metrics.report_failures.inc();
            warn!(
                remote_job_id,
                external_id = %report.external_id,
                error = %error,
                "TestLink report failed; job stays unreported"
            );
            return Err(error);
        }

        if !claim.mark_reported().await? {
            return Ok(ReportOutcome::AlreadyReported);
        }

        self.metrics.reports_sent.inc();
        info!(
            remote_job_id,
            external_id = %report.external_id,
            code = code.as_str(),
            "result reported to TestLink"
        );
        Ok(ReportOutcome::Reported { code })
    }

    /// 終端済み・未報告のジョブを1件ずつ独立に報告する
    pub(crate) async fn report_pending(&self, limit: i64) -> Result<BulkReport, SyncError> {
        let jobs = self.dao.unreported_terminal_jobs(limit).await?;
        let mut summary = BulkReport {
            attempted: jobs.len(),
            ..BulkReport::default()
        };

        for job in jobs {
            match self.report(&job.remote_job_id).await {
                Ok(ReportOutcome::Reported { .. }) => summary.reported += 1,
                Ok(outcome) => {
                    debug!(remote_job_id = %job.remote_job_id, ?outcome, "bulk report skipped job");
                }
                Err(error) => {
                    summary.failed += 1;
                    warn!(
                        remote_job_id = %job.remote_job_id,
                        error = %error,
                        "bulk report failed for job"
                    );
                }
            }
        }

        info!(
            attempted = summary.attempted,
            reported = summary.reported,
            failed = summary.failed,
            "bulk report finished"
        );
        Ok(summary)
    }
}

fn notes(job: &Job, result: &str) -> String {
    format!(
        "OpenQA result: {result}\nJob: {}\nLogs: {}",
        job.remote_job_id,
        job.log_url.as_deref().unwrap_or_default()
    )
}
