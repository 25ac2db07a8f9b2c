//! 同期コーディネーター: TestLink からテストケースを取り込み、起動と
//! 整合性回復（reconcile）を駆動する。後続の処理はすべてタスクキュー経由。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::launcher::{JobLauncher, LaunchOutcome};
use super::{TestRepository, test_name};
use crate::config::Config;
use crate::error::SyncError;
use crate::observability::metrics::Metrics;
use crate::queue::{TaskPayload, TaskQueue};
use crate::store::dao::SyncDao;
use crate::store::models::{NewTestCase, TestCase, TestCaseStatus, external_id};

const PENDING_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SyncSummary {
    pub(crate) synced_cases: usize,
    pub(crate) total_cases: i64,
    pub(crate) sample_case: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct KeyFailure {
    pub(crate) testcase_number: i64,
    pub(crate) error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SyncAllSummary {
    pub(crate) attempted: usize,
    pub(crate) synced_cases: usize,
    pub(crate) total_cases: i64,
    pub(crate) failures: Vec<KeyFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct LaunchEntry {
    pub(crate) testcase_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) remote_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    /// リモートにジョブはあるが、初回ポーリングを投入できなかった
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) monitor_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct LaunchPendingSummary {
    pub(crate) launched: usize,
    pub(crate) results: Vec<LaunchEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct ReconcileSummary {
    pub(crate) adopted: usize,
    pub(crate) requeued_monitors: usize,
    pub(crate) failures: usize,
}

pub(crate) struct SyncCoordinator {
    config: Arc<Config>,
    dao: Arc<dyn SyncDao>,
    repository: Arc<dyn TestRepository>,
    launcher: Arc<JobLauncher>,
    queue: TaskQueue,
    metrics: Arc<Metrics>,
}

impl SyncCoordinator {
    pub(crate) fn new(
        config: Arc<Config>,
        dao: Arc<dyn SyncDao>,
        repository: Arc<dyn TestRepository>,
        launcher: Arc<JobLauncher>,
        queue: TaskQueue,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            dao,
            repository,
            launcher,
            queue,
            metrics,
        }
    }

    /// テストケースを1件同期する。既存の行には一切触れない（追加のみ）。
    pub(crate) async fn sync_one(&self, testcase_number: i64) -> Result<SyncSummary, SyncError> {
        let synced = self.pull(testcase_number).await?;
        Ok(SyncSummary {
            synced_cases: usize::from(synced.inserted),
            total_cases: self.dao.count_test_cases().await?,
            sample_case: Some(synced.name),
        })
    }

    /// `TESTLINK_SYNC_KEYS` の全キーを同期する。1件の失敗で中断しない。
    pub(crate) async fn sync_all(&self) -> Result<SyncAllSummary, SyncError> {
        let keys = self.config.testlink_sync_keys();
        let mut synced_cases = 0;
        let mut failures = Vec::new();

        for &testcase_number in keys {
            match self.pull(testcase_number).await {
                Ok(synced) => synced_cases += usize::from(synced.inserted),
                Err(error) => {
                    warn!(testcase_number, error = %error, "test case sync failed");
                    failures.push(KeyFailure {
                        testcase_number,
                        error: error.to_string(),
                    });
                }
            }
        }

        let summary = SyncAllSummary {
            attempted: keys.len(),
            synced_cases,
            total_cases: self.dao.count_test_cases().await?,
            failures,
        };
        info!(
            attempted = summary.attempted,
            synced_cases = summary.synced_cases,
            failed = summary.failures.len(),
            total_cases = summary.total_cases,
            "test case sync finished"
        );
        Ok(summary)
    }

    async fn pull(&self, testcase_number: i64) -> Result<Pulled, SyncError> {
        if let Some(existing) = self.dao.find_test_case_by_number(testcase_number).await? {
            debug!(testcase_number, "test case already present, leaving it untouched");
            return Ok(Pulled {
                inserted: false,
                name: existing.name,
            });
        }

        let key = external_id(self.config.testlink_key_prefix(), testcase_number);
        let definition = self.repository.fetch_test_case(&key).await?;
        let inserted = self
            .dao
            .insert_test_case_if_absent(&NewTestCase {
                testcase_number,
                name: definition.name.clone(),
                preconditions: definition.preconditions,
                steps: definition.steps,
                test_suite_id: definition.suite_id,
            })
            .await?;

        if inserted {
            self.metrics.test_cases_synced.inc();
            info!(testcase_number, external_id = %key, "test case synced");
        }
        Ok(Pulled {
            inserted,
            name: definition.name,
        })
    }

    /// ジョブを起動し、待機時間の後に初回ポーリングを予約する
    pub(crate) async fn launch_and_watch(
        &self,
        testcase_number: i64,
    ) -> Result<LaunchOutcome, SyncError> {
        let outcome = self.launcher.launch(testcase_number).await?;
        self.watch_recorded(&outcome).await?;
        Ok(outcome)
    }

    /// 記録したばかりのジョブの初回ポーリングを予約する。
    /// 取り込んだジョブは既に終わっている可能性があるので即時にポーリングする。
    async fn watch_recorded(&self, outcome: &LaunchOutcome) -> Result<(), SyncError> {
        match outcome {
            LaunchOutcome::Launched(job) => {
                self.watch(&job.remote_job_id, self.config.monitor_settle_delay())
                    .await
            }
            LaunchOutcome::Adopted(job) => self.watch(&job.remote_job_id, Duration::ZERO).await,
            LaunchOutcome::AlreadyActive(_) | LaunchOutcome::InProgress => Ok(()),
        }
    }

    /// pending のテストケースを最大 `limit` 件起動する。失敗は1件ごとに返す。
    pub(crate) async fn launch_pending(
        &self,
        limit: i64,
    ) -> Result<LaunchPendingSummary, SyncError> {
        let cases = self
            .dao
            .list_test_cases(Some(TestCaseStatus::Pending), 0, limit)
            .await?;
        let mut results = Vec::with_capacity(cases.len());
        let mut launched = 0;

        for case in cases {
            let testcase_number = case.testcase_number;
            let entry = match self.launcher.launch(testcase_number).await {
                Ok(outcome) => {
                    if matches!(
                        outcome,
                        LaunchOutcome::Launched(_) | LaunchOutcome::Adopted(_)
                    ) {
                        launched += 1;
                    }
                    // monitor のないアクティブジョブは reconcile が拾う
                    let monitor_error = match self.watch_recorded(&outcome).await {
                        Ok(()) => None,
                        Err(error) => {
                            warn!(
                                testcase_number,
                                error = %error,
                                "job launched but its first poll could not be queued"
                            );
                            Some(error.to_string())
                        }
                    };
                    LaunchEntry {
                        testcase_number,
                        remote_job_id: outcome.job().map(|job| job.remote_job_id.clone()),
                        error: outcome
                            .job()
                            .is_none()
                            .then(|| "launch already in progress".to_string()),
                        monitor_error,
                    }
                }
                Err(error) => {
                    warn!(testcase_number, error = %error, "pending launch failed");
                    LaunchEntry {
                        testcase_number,
                        remote_job_id: None,
                        error: Some(error.to_string()),
                        monitor_error: None,
                    }
                }
            };
            results.push(entry);
        }

        info!(launched, attempted = results.len(), "pending test cases launched");
        Ok(LaunchPendingSummary { launched, results })
    }

    /// 取りこぼした作業を回復する。
    ///
    /// pending のテストケースを決定的なテスト名でリモートジョブと突き合わせ、
    /// OpenQA が受理したのにローカルに記録されていないジョブを取り込む
    /// （既に終了していても取り込む）。生きた monitor タスクを持たない
    /// アクティブジョブには新しく投入する。
    pub(crate) async fn reconcile(&self) -> Result<ReconcileSummary, SyncError> {
        let mut summary = ReconcileSummary::default();

        for case in self.pending_cases().await? {
            match self.adopt_orphan(&case).await {
                Ok(true) => summary.adopted += 1,
                Ok(false) => {}
                Err(error) => {
                    summary.failures += 1;
                    warn!(
                        testcase_number = case.testcase_number,
                        error = %error,
                        "orphan lookup failed"
                    );
                }
            }
        }

        for job in self.dao.unmonitored_active_jobs().await? {
            self.watch(&job.remote_job_id, Duration::ZERO).await?;
            summary.requeued_monitors += 1;
            info!(
                remote_job_id = %job.remote_job_id,
                testcase_number = job.testcase_number,
                "monitor re-enqueued for active job"
            );
        }

        info!(
            adopted = summary.adopted,
            requeued_monitors = summary.requeued_monitors,
            failures = summary.failures,
            "reconciliation finished"
        );
        Ok(summary)
    }

    async fn pending_cases(&self) -> Result<Vec<TestCase>, SyncError> {
        let mut cases = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .dao
                .list_test_cases(Some(TestCaseStatus::Pending), offset, PENDING_PAGE_SIZE)
                .await?;
            let fetched = i64::try_from(page.len()).unwrap_or(i64::MAX);
            cases.extend(page);
            if fetched < PENDING_PAGE_SIZE {
                return Ok(cases);
            }
            offset += fetched;
        }
    }

    async fn adopt_orphan(&self, case: &TestCase) -> Result<bool, SyncError> {
        let Some(orphan) = self.launcher.find_orphan(&test_name(case)).await? else {
            return Ok(false);
        };

        let outcome = self.launcher.adopt(case.testcase_number, &orphan).await?;
        let adopted = matches!(outcome, LaunchOutcome::Adopted(_));
        self.watch_recorded(&outcome).await?;
        Ok(adopted)
    }

    async fn watch(&self, remote_job_id: &str, delay: Duration) -> Result<(), SyncError> {
        self.queue
            .enqueue_after(
                TaskPayload::Monitor {
                    remote_job_id: remote_job_id.to_string(),
                },
                delay,
            )
            .await?;
        Ok(())
    }
}

struct Pulled {
    inserted: bool,
    name: String,
}
