// テスト用のインメモリ SyncDao 実装
// PostgreSQL と同じ一意制約と条件付き更新を再現する

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::traits::{JobDao, LaunchClaim, ReportClaim, SyncDao, TaskDao, TestCaseDao};
use crate::error::SyncError;
use crate::store::models::{
    Job, JobProgress, NewJob, NewTask, NewTestCase, TaskRecord, TaskStatus, TerminalObservation,
    TestCase, TestCaseStatus,
};

#[derive(Default)]
struct State {
    test_cases: Vec<TestCase>,
    jobs: Vec<Job>,
    tasks: Vec<TaskRecord>,
    launch_locks: HashSet<i64>,
    report_locks: HashSet<String>,
    fail_next_launch_commit: bool,
    fail_next_task_insert: bool,
    ping_failure: Option<String>,
}

impl State {
    fn job_view(&self, job: &Job) -> Job {
        let mut job = job.clone();
        if let Some(case) = self.test_cases.iter().find(|c| c.id == job.testcase_id) {
            job.testcase_number = case.testcase_number;
        }
        job
    }
}

/// テスト用のモック SyncDao（DB接続なしで動作）
#[derive(Clone, Default)]
pub(crate) struct MockSyncDao {
    state: Arc<Mutex<State>>,
}

impl MockSyncDao {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("mock state poisoned")
    }

    pub(crate) fn seed_test_case(&self, testcase_number: i64, name: &str) -> TestCase {
        let mut state = self.lock();
        let now = Utc::now();
        let case = TestCase {
            id: i64::try_from(state.test_cases.len()).unwrap_or(0) + 1,
            testcase_number,
            name: name.to_string(),
            preconditions: None,
            steps: Value::Array(Vec::new()),
            test_suite_id: None,
            status: TestCaseStatus::Pending,
            active_job_id: None,
            last_job_id: None,
            created_at: now,
            updated_at: now,
        };
        state.test_cases.push(case.clone());
        case
    }

    pub(crate) fn test_case(&self, testcase_number: i64) -> Option<TestCase> {
        self.lock()
            .test_cases
            .iter()
            .find(|c| c.testcase_number == testcase_number)
            .cloned()
    }

    pub(crate) fn jobs(&self) -> Vec<Job> {
        let state = self.lock();
        state.jobs.iter().map(|job| state.job_view(job)).collect()
    }

    pub(crate) fn tasks(&self) -> Vec<TaskRecord> {
        self.lock().tasks.clone()
    }

    /// 次の launch commit を永続化エラーにする（リモート成功・ローカル失敗の再現）
    pub(crate) fn fail_next_launch_commit(&self) {
        self.lock().fail_next_launch_commit = true;
    }

    /// 次のタスク投入を永続化エラーにする
    pub(crate) fn fail_next_task_insert(&self) {
        self.lock().fail_next_task_insert = true;
    }

    /// DB 疎通確認を失敗させる
    pub(crate) fn fail_ping(&self, message: &str) {
        self.lock().ping_failure = Some(message.to_string());
    }

    /// 他のワーカーが報告ロックを保持している状態を再現する
    pub(crate) fn hold_report_lock(&self, remote_job_id: &str) {
        self.lock().report_locks.insert(remote_job_id.to_string());
    }

    /// run_after を過ぎたことにして即座に取り出せるようにする
    pub(crate) fn make_tasks_due(&self) {
        let now = Utc::now();
        for task in &mut self.lock().tasks {
            task.run_after = task.run_after.min(now);
        }
    }

    pub(crate) fn set_task_started_at(&self, task_id: Uuid, started_at: DateTime<Utc>) {
        if let Some(task) = self.lock().tasks.iter_mut().find(|t| t.id == task_id) {
            task.started_at = Some(started_at);
        }
    }
}

struct MockLaunchClaim {
    state: Arc<Mutex<State>>,
    test_case: TestCase,
    active_job: Option<Job>,
}

impl Drop for MockLaunchClaim {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.launch_locks.remove(&self.test_case.testcase_number);
        }
    }
}

#[async_trait]
impl LaunchClaim for MockLaunchClaim {
    fn test_case(&self) -> &TestCase {
        &self.test_case
    }

    fn active_job(&self) -> Option<&Job> {
        self.active_job.as_ref()
    }

    async fn commit(self: Box<Self>, job: NewJob) -> Result<Job, SyncError> {
        let mut state = self.state.lock().expect("mock state poisoned");

        if state.fail_next_launch_commit {
            state.fail_next_launch_commit = false;
            return Err(SyncError::Persistence(anyhow::anyhow!(
                "simulated commit failure"
            )));
        }
        if state
            .jobs
            .iter()
            .any(|j| j.remote_job_id == job.remote_job_id)
        {
            return Err(SyncError::StateConflict(format!(
                "job {} already recorded",
                job.remote_job_id
            )));
        }
        if state
            .jobs
            .iter()
            .any(|j| j.testcase_id == self.test_case.id && !j.terminal)
        {
            return Err(SyncError::StateConflict(format!(
                "test case {} already has an active job",
                self.test_case.testcase_number
            )));
        }

        let now = Utc::now();
        let stored = Job {
            id: i64::try_from(state.jobs.len()).unwrap_or(0) + 1,
            testcase_id: self.test_case.id,
            testcase_number: self.test_case.testcase_number,
            remote_job_id: job.remote_job_id.clone(),
            remote_status: job.remote_status,
            remote_result: None,
            log_url: job.log_url,
            started_at: job.started_at,
            finished_at: None,
            terminal: false,
            reported_at: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.push(stored.clone());

        if let Some(case) = state
            .test_cases
            .iter_mut()
            .find(|c| c.id == self.test_case.id)
        {
            case.status = TestCaseStatus::Running;
            case.active_job_id = Some(job.remote_job_id.clone());
            case.last_job_id = Some(job.remote_job_id);
            case.updated_at = now;
        }

        Ok(stored)
    }
}

struct MockReportClaim {
    state: Arc<Mutex<State>>,
    job: Job,
}

impl Drop for MockReportClaim {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.report_locks.remove(&self.job.remote_job_id);
        }
    }
}

#[async_trait]
impl ReportClaim for MockReportClaim {
    fn job(&self) -> &Job {
        &self.job
    }

    async fn mark_reported(self: Box<Self>) -> Result<bool, SyncError> {
        let mut state = self.state.lock().expect("mock state poisoned");
        let Some(job) = state.jobs.iter_mut().find(|j| j.id == self.job.id) else {
            return Ok(false);
        };
        if !job.terminal || job.reported_at.is_some() {
            return Ok(false);
        }
        job.reported_at = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl SyncDao for MockSyncDao {
    async fn ping(&self) -> Result<(), SyncError> {
        match &self.lock().ping_failure {
            Some(message) => Err(SyncError::Persistence(anyhow::anyhow!(message.clone()))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TestCaseDao for MockSyncDao {
    async fn insert_test_case_if_absent(&self, case: &NewTestCase) -> Result<bool, SyncError> {
        let mut state = self.lock();
        if state
            .test_cases
            .iter()
            .any(|c| c.testcase_number == case.testcase_number)
        {
            return Ok(false);
        }
        let now = Utc::now();
        let id = i64::try_from(state.test_cases.len()).unwrap_or(0) + 1;
        state.test_cases.push(TestCase {
            id,
            testcase_number: case.testcase_number,
            name: case.name.clone(),
            preconditions: case.preconditions.clone(),
            steps: case.steps.clone(),
            test_suite_id: case.test_suite_id,
            status: TestCaseStatus::Pending,
            active_job_id: None,
            last_job_id: None,
            created_at: now,
            updated_at: now,
        });
        Ok(true)
    }

    async fn count_test_cases(&self) -> Result<i64, SyncError> {
        Ok(i64::try_from(self.lock().test_cases.len()).unwrap_or(i64::MAX))
    }

    async fn find_test_case_by_number(
        &self,
        testcase_number: i64,
    ) -> Result<Option<TestCase>, SyncError> {
        Ok(self.test_case(testcase_number))
    }

    async fn list_test_cases(
        &self,
        status: Option<TestCaseStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TestCase>, SyncError> {
        let mut cases: Vec<TestCase> = self
            .lock()
            .test_cases
            .iter()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        cases.sort_by_key(|c| c.testcase_number);
        Ok(cases
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn count_by_status(&self) -> Result<Vec<(TestCaseStatus, i64)>, SyncError> {
        let mut counts: HashMap<TestCaseStatus, i64> = HashMap::new();
        for case in &self.lock().test_cases {
            *counts.entry(case.status).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by_key(|(status, _)| status.as_str());
        Ok(counts)
    }
}

#[async_trait]
impl JobDao for MockSyncDao {
    async fn begin_launch(
        &self,
        testcase_number: i64,
    ) -> Result<Option<Box<dyn LaunchClaim>>, SyncError> {
        let mut state = self.lock();
        let Some(test_case) = state
            .test_cases
            .iter()
            .find(|c| c.testcase_number == testcase_number)
            .cloned()
        else {
            return Err(SyncError::not_found("test case", testcase_number));
        };
        if !state.launch_locks.insert(testcase_number) {
            return Ok(None);
        }
        let active_job = state
            .jobs
            .iter()
            .find(|j| j.testcase_id == test_case.id && !j.terminal)
            .map(|j| state.job_view(j));

        Ok(Some(Box::new(MockLaunchClaim {
            state: Arc::clone(&self.state),
            test_case,
            active_job,
        })))
    }

    async fn find_job(&self, remote_job_id: &str) -> Result<Option<Job>, SyncError> {
        let state = self.lock();
        Ok(state
            .jobs
            .iter()
            .find(|j| j.remote_job_id == remote_job_id)
            .map(|j| state.job_view(j)))
    }

    async fn record_progress(
        &self,
        remote_job_id: &str,
        progress: &JobProgress,
    ) -> Result<bool, SyncError> {
        let mut state = self.lock();
        let Some(job) = state
            .jobs
            .iter_mut()
            .find(|j| j.remote_job_id == remote_job_id && !j.terminal)
        else {
            return Ok(false);
        };
        job.remote_status.clone_from(&progress.remote_status);
        job.started_at = job.started_at.or(progress.started_at);
        if progress.log_url.is_some() {
            job.log_url.clone_from(&progress.log_url);
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_terminal(
        &self,
        remote_job_id: &str,
        observation: &TerminalObservation,
    ) -> Result<bool, SyncError> {
        let mut state = self.lock();
        let now = Utc::now();
        let Some(job) = state
            .jobs
            .iter_mut()
            .find(|j| j.remote_job_id == remote_job_id && !j.terminal)
        else {
            return Ok(false);
        };
        job.remote_status.clone_from(&observation.remote_status);
        job.remote_result = Some(observation.remote_result.clone());
        job.started_at = job.started_at.or(observation.started_at);
        job.finished_at = observation.finished_at.or(job.finished_at).or(Some(now));
        if observation.log_url.is_some() {
            job.log_url.clone_from(&observation.log_url);
        }
        job.terminal = true;
        job.updated_at = now;
        let testcase_id = job.testcase_id;

        if let Some(case) = state
            .test_cases
            .iter_mut()
            .find(|c| c.id == testcase_id && c.last_job_id.as_deref() == Some(remote_job_id))
        {
            case.status = observation.testcase_status;
            case.active_job_id = None;
            case.updated_at = now;
        }
        Ok(true)
    }

    async fn begin_report(
        &self,
        remote_job_id: &str,
    ) -> Result<Option<Box<dyn ReportClaim>>, SyncError> {
        let mut state = self.lock();
        let Some(job) = state
            .jobs
            .iter()
            .find(|j| j.remote_job_id == remote_job_id)
            .map(|j| state.job_view(j))
        else {
            return Err(SyncError::not_found("job", remote_job_id));
        };
        if !state.report_locks.insert(remote_job_id.to_string()) {
            return Ok(None);
        }

        Ok(Some(Box::new(MockReportClaim {
            state: Arc::clone(&self.state),
            job,
        })))
    }

    async fn unreported_terminal_jobs(&self, limit: i64) -> Result<Vec<Job>, SyncError> {
        let state = self.lock();
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.terminal && j.reported_at.is_none())
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|j| state.job_view(j))
            .collect())
    }

    async fn unmonitored_active_jobs(&self) -> Result<Vec<Job>, SyncError> {
        let state = self.lock();
        Ok(state
            .jobs
            .iter()
            .filter(|j| !j.terminal)
            .filter(|j| {
                !state.tasks.iter().any(|t| {
                    t.kind == "monitor"
                        && !t.status.is_finished()
                        && t.params.get("remote_job_id").and_then(Value::as_str)
                            == Some(j.remote_job_id.as_str())
                })
            })
            .map(|j| state.job_view(j))
            .collect())
    }

    async fn count_jobs(&self) -> Result<i64, SyncError> {
        Ok(i64::try_from(self.lock().jobs.len()).unwrap_or(i64::MAX))
    }

    async fn count_unreported_jobs(&self) -> Result<i64, SyncError> {
        let count = self
            .lock()
            .jobs
            .iter()
            .filter(|j| j.terminal && j.reported_at.is_none())
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl TaskDao for MockSyncDao {
    async fn insert_task(&self, task: &NewTask) -> Result<(), SyncError> {
        let mut state = self.lock();
        if state.fail_next_task_insert {
            state.fail_next_task_insert = false;
            return Err(SyncError::Persistence(anyhow::anyhow!(
                "simulated task insert failure"
            )));
        }
        state.tasks.push(TaskRecord {
            id: task.id,
            kind: task.kind.clone(),
            params: task.params.clone(),
            status: TaskStatus::Pending,
            result: None,
            error_message: None,
            retry_count: 0,
            max_retries: task.max_retries,
            run_after: task.run_after,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        });
        Ok(())
    }

    async fn claim_next_task(&self) -> Result<Option<TaskRecord>, SyncError> {
        let mut state = self.lock();
        let now = Utc::now();
        let next = state
            .tasks
            .iter_mut()
            .filter(|t| {
                matches!(t.status, TaskStatus::Pending | TaskStatus::Retrying) && t.run_after <= now
            })
            .min_by_key(|t| (t.run_after, t.created_at));
        let Some(task) = next else {
            return Ok(None);
        };
        task.status = TaskStatus::Running;
        task.started_at = Some(now);
        Ok(Some(task.clone()))
    }

    async fn mark_task_succeeded(&self, task_id: Uuid, result: &Value) -> Result<(), SyncError> {
        if let Some(task) = self.lock().tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Succeeded;
            task.result = Some(result.clone());
            task.error_message = None;
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_task_retrying(
        &self,
        task_id: Uuid,
        error: &str,
        run_after: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        if let Some(task) = self.lock().tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Retrying;
            task.error_message = Some(error.to_string());
            task.retry_count += 1;
            task.run_after = run_after;
            task.started_at = None;
        }
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: Uuid, error: &str) -> Result<(), SyncError> {
        if let Some(task) = self.lock().tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = TaskStatus::Failed;
            task.error_message = Some(error.to_string());
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, SyncError> {
        Ok(self.lock().tasks.iter().find(|t| t.id == task_id).cloned())
    }

    async fn requeue_stale_tasks(&self, started_before: DateTime<Utc>) -> Result<u64, SyncError> {
        let mut requeued = 0;
        for task in &mut self.lock().tasks {
            if task.status == TaskStatus::Running
                && task.started_at.is_some_and(|at| at < started_before)
            {
                task.error_message = Some("worker lost while task was running".to_string());
                task.run_after = Utc::now();
                if task.retry_count < task.max_retries {
                    task.status = TaskStatus::Retrying;
                    task.retry_count += 1;
                    task.started_at = None;
                } else {
                    task.status = TaskStatus::Failed;
                    task.completed_at = Some(Utc::now());
                }
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn count_open_tasks(&self) -> Result<i64, SyncError> {
        let count = self
            .lock()
            .tasks
            .iter()
            .filter(|t| !t.status.is_finished())
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}
