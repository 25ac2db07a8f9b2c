use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use super::types::TaskPayload;
use super::{TaskHandler, TaskQueue};
use crate::error::SyncError;
use crate::lifecycle::{
    JobMonitor, LaunchOutcome, PollOutcome, ReportOutcome, ResultReporter, SyncCoordinator,
};

/// Routes each task kind to the lifecycle component that owns it.
///
/// Follow-up tasks (next poll, report) are enqueued only after the state change
/// that warrants them has been persisted.
pub(crate) struct TaskDispatcher {
    coordinator: Arc<SyncCoordinator>,
    monitor: Arc<JobMonitor>,
    reporter: Arc<ResultReporter>,
    queue: TaskQueue,
    poll_interval: Duration,
    report_batch_limit: i64,
    stale_after: Duration,
}

impl TaskDispatcher {
    pub(crate) fn new(
        coordinator: Arc<SyncCoordinator>,
        monitor: Arc<JobMonitor>,
        reporter: Arc<ResultReporter>,
        queue: TaskQueue,
        poll_interval: Duration,
        report_batch_limit: i64,
        stale_after: Duration,
    ) -> Self {
        Self {
            coordinator,
            monitor,
            reporter,
            queue,
            poll_interval,
            report_batch_limit,
            stale_after,
        }
    }

    async fn monitor(&self, remote_job_id: String) -> Result<Value, SyncError> {
        match self.monitor.poll(&remote_job_id).await? {
            PollOutcome::Pending { remote_status } => {
                let next = self
                    .queue
                    .enqueue_after(
                        TaskPayload::Monitor {
                            remote_job_id: remote_job_id.clone(),
                        },
                        self.poll_interval,
                    )
                    .await?;
                debug!(remote_job_id = %remote_job_id, next_task = %next, "next poll scheduled");
                Ok(json!({
                    "state": "pending",
                    "remote_status": remote_status,
                    "next_task_id": next,
                }))
            }
            PollOutcome::Terminal { status, result } => {
                let report = self
                    .queue
                    .enqueue(TaskPayload::Report {
                        remote_job_id: remote_job_id.clone(),
                    })
                    .await?;
                Ok(json!({
                    "state": "terminal",
                    "status": status,
                    "result": result,
                    "report_task_id": report,
                }))
            }
            PollOutcome::AlreadyTerminal => Ok(json!({"state": "already_terminal"})),
        }
    }

    async fn report(&self, remote_job_id: &str) -> Result<Value, SyncError> {
        Ok(match self.reporter.report(remote_job_id).await? {
            ReportOutcome::Reported { code } => json!({"outcome": "reported", "code": code}),
            ReportOutcome::AlreadyReported => json!({"outcome": "already_reported"}),
            ReportOutcome::InProgress => json!({"outcome": "in_progress"}),
            ReportOutcome::NotTerminal => json!({"outcome": "not_terminal"}),
        })
    }

    async fn reconcile(&self) -> Result<Value, SyncError> {
        let requeued_tasks = self.queue.store().requeue_stale(self.stale_after).await?;
        let summary = self.coordinator.reconcile().await?;
        let mut value = encode(&summary)?;
        value["requeued_tasks"] = json!(requeued_tasks);
        Ok(value)
    }
}

#[async_trait]
impl TaskHandler for TaskDispatcher {
    async fn handle(&self, payload: TaskPayload) -> Result<Value, SyncError> {
        match payload {
            TaskPayload::Launch { testcase_number } => {
                let outcome = self.coordinator.launch_and_watch(testcase_number).await?;
                Ok(launch_result(&outcome))
            }
            TaskPayload::Monitor { remote_job_id } => self.monitor(remote_job_id).await,
            TaskPayload::Report { remote_job_id } => self.report(&remote_job_id).await,
            TaskPayload::Sync { testcase_number } => {
                encode(&self.coordinator.sync_one(testcase_number).await?)
            }
            TaskPayload::SyncAll => encode(&self.coordinator.sync_all().await?),
            TaskPayload::BulkReport => encode(
                &self
                    .reporter
                    .report_pending(self.report_batch_limit)
                    .await?,
            ),
            TaskPayload::Reconcile => self.reconcile().await,
            TaskPayload::LaunchPending { limit } => {
                encode(&self.coordinator.launch_pending(limit).await?)
            }
        }
    }
}

fn launch_result(outcome: &LaunchOutcome) -> Value {
    let label = match outcome {
        LaunchOutcome::Launched(_) => "launched",
        LaunchOutcome::Adopted(_) => "adopted",
        LaunchOutcome::AlreadyActive(_) => "already_active",
        LaunchOutcome::InProgress => "in_progress",
    };
    json!({
        "outcome": label,
        "remote_job_id": outcome.job().map(|job| job.remote_job_id.as_str()),
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Value, SyncError> {
    serde_json::to_value(value)
        .map_err(|error| SyncError::persistence(error, "failed to encode task result"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::lifecycle::fakes::{FakeFarm, FakeRepository, remote_job, test_metrics, test_profile};
    use crate::lifecycle::{ExecutionFarm, JobLauncher, TestRepository, test_name};
    use crate::queue::QueueStore;
    use crate::store::dao::mock::MockSyncDao;
    use crate::store::models::TestCaseStatus;
    use crate::util::retry::RetryConfig;

    struct Harness {
        dao: MockSyncDao,
        farm: Arc<FakeFarm>,
        repository: Arc<FakeRepository>,
        queue: TaskQueue,
        dispatcher: TaskDispatcher,
    }

    fn harness() -> Harness {
        let config = Arc::new(test_config());
        let dao = MockSyncDao::new();
        let farm = Arc::new(FakeFarm::default());
        let repository = Arc::new(FakeRepository::default());
        let metrics = test_metrics();
        let queue = TaskQueue::new(QueueStore::new(Arc::new(dao.clone())), 3);
        let launcher = Arc::new(JobLauncher::new(
            Arc::new(dao.clone()),
            Arc::clone(&farm) as Arc<dyn ExecutionFarm>,
            test_profile(),
            Arc::clone(&metrics),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&config),
            Arc::new(dao.clone()),
            Arc::clone(&repository) as Arc<dyn TestRepository>,
            launcher,
            queue.clone(),
            Arc::clone(&metrics),
        ));
        let monitor = Arc::new(JobMonitor::new(
            Arc::new(dao.clone()),
            Arc::clone(&farm) as Arc<dyn ExecutionFarm>,
            RetryConfig::new(3, 0, 0),
            Arc::clone(&metrics),
        ));
        let reporter = Arc::new(ResultReporter::new(
            Arc::new(dao.clone()),
            Arc::clone(&repository) as Arc<dyn TestRepository>,
            "repo-tests",
            metrics,
        ));
        let dispatcher = TaskDispatcher::new(
            coordinator,
            monitor,
            reporter,
            queue.clone(),
            Duration::from_secs(30),
            500,
            Duration::from_secs(900),
        );
        Harness {
            dao,
            farm,
            repository,
            queue,
            dispatcher,
        }
    }

    /// Runs due tasks through the dispatcher until the queue is drained.
    async fn drain(h: &Harness) -> Vec<String> {
        let mut kinds = Vec::new();
        for _ in 0..20 {
            h.dao.make_tasks_due();
            let Some(task) = h.queue.store().claim().await.unwrap() else {
                return kinds;
            };
            let payload: TaskPayload = serde_json::from_value(task.params.clone()).unwrap();
            let result = h.dispatcher.handle(payload).await.unwrap();
            h.queue
                .store()
                .mark_succeeded(task.id, &result)
                .await
                .unwrap();
            kinds.push(task.kind);
        }
        panic!("queue did not drain");
    }

    #[tokio::test]
    async fn launch_task_drives_job_to_reported() {
        let h = harness();
        h.dao.seed_test_case(42, "boot");
        h.farm.push_id("J100");
        h.farm.script(
            "J100",
            vec![
                remote_job("J100", "running", None),
                remote_job("J100", "done", Some("passed")),
            ],
        );
        h.queue
            .enqueue(TaskPayload::Launch {
                testcase_number: 42,
            })
            .await
            .unwrap();

        let kinds = drain(&h).await;

        assert_eq!(kinds, vec!["launch", "monitor", "monitor", "report"]);
        let case = h.dao.test_case(42).expect("case");
        assert_eq!(case.status, TestCaseStatus::Passed);
        assert!(h.dao.jobs()[0].is_reported());
        let reports = h.repository.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].notes.contains("J100"));
    }

    #[tokio::test]
    async fn pending_poll_schedules_successor_after_interval() {
        let h = harness();
        h.dao.seed_test_case(42, "boot");
        h.farm.push_id("J100");
        h.farm.script("J100", vec![remote_job("J100", "running", None)]);
        h.dispatcher
            .handle(TaskPayload::Launch {
                testcase_number: 42,
            })
            .await
            .unwrap();

        let result = h
            .dispatcher
            .handle(TaskPayload::Monitor {
                remote_job_id: "J100".into(),
            })
            .await
            .unwrap();

        assert_eq!(result["state"], "pending");
        assert_eq!(result["remote_status"], "running");
        let successor = h
            .dao
            .tasks()
            .into_iter()
            .find(|task| Some(task.id.to_string()) == result["next_task_id"].as_str().map(str::to_string))
            .expect("successor task");
        assert!(successor.run_after > chrono::Utc::now() + chrono::TimeDelta::seconds(20));
    }

    #[tokio::test]
    async fn monitor_of_terminal_job_enqueues_nothing() {
        let h = harness();
        h.dao.seed_test_case(42, "boot");
        h.farm.push_id("J100");
        h.farm
            .script("J100", vec![remote_job("J100", "done", Some("failed"))]);
        h.dispatcher
            .handle(TaskPayload::Launch {
                testcase_number: 42,
            })
            .await
            .unwrap();
        let monitor = TaskPayload::Monitor {
            remote_job_id: "J100".into(),
        };
        h.dispatcher.handle(monitor.clone()).await.unwrap();
        let before = h.dao.tasks().len();

        let result = h.dispatcher.handle(monitor).await.unwrap();

        assert_eq!(result, json!({"state": "already_terminal"}));
        assert_eq!(h.dao.tasks().len(), before);
    }

    #[tokio::test]
    async fn launch_result_carries_job_id() {
        let h = harness();
        h.dao.seed_test_case(42, "boot");
        h.farm.push_id("J100");

        let result = h
            .dispatcher
            .handle(TaskPayload::Launch {
                testcase_number: 42,
            })
            .await
            .unwrap();

        assert_eq!(
            result,
            json!({"outcome": "launched", "remote_job_id": "J100"})
        );
    }

    #[tokio::test]
    async fn reconcile_task_reports_requeued_tasks() {
        let h = harness();

        let result = h.dispatcher.handle(TaskPayload::Reconcile).await.unwrap();

        assert_eq!(result["requeued_tasks"], 0);
        assert_eq!(result["adopted"], 0);
        assert_eq!(result["requeued_monitors"], 0);
    }

    #[tokio::test]
    async fn finished_orphan_is_adopted_and_reported() {
        let h = harness();
        let case = h.dao.seed_test_case(42, "boot");
        let finished = remote_job("J100", "done", Some("failed"));
        h.farm
            .list_for_test(&test_name(&case), vec![finished.clone()]);
        h.farm.script("J100", vec![finished]);
        h.queue.enqueue(TaskPayload::Reconcile).await.unwrap();

        let kinds = drain(&h).await;

        assert_eq!(kinds, vec!["reconcile", "monitor", "report"]);
        assert_eq!(
            h.dao.test_case(42).expect("case").status,
            TestCaseStatus::Failed
        );
        assert!(h.dao.jobs()[0].is_reported());
        assert_eq!(h.repository.reports().len(), 1);
        assert!(h.farm.submitted().is_empty());
    }

    #[tokio::test]
    async fn bulk_report_task_returns_counts() {
        let h = harness();

        let result = h.dispatcher.handle(TaskPayload::BulkReport).await.unwrap();

        assert_eq!(result, json!({"attempted": 0, "reported": 0, "failed": 0}));
    }
}
