//! JobDao trait - OpenQA ジョブの記録と、それを守るクレーム

use async_trait::async_trait;

use crate::error::SyncError;
use crate::store::models::{Job, JobProgress, NewJob, TerminalObservation, TestCase};

/// 1テストケースに対するジョブ起動の排他権。
///
/// commit せずに drop するとロックが解放され、何も残らない。
#[async_trait]
pub(crate) trait LaunchClaim: Send {
    fn test_case(&self) -> &TestCase;

    /// テストケースに紐づく非終端ジョブ（あれば）
    fn active_job(&self) -> Option<&Job>;

    /// ジョブを保存し、同じトランザクションでテストケースを `running` にする。
    ///
    /// # Errors
    /// リモート ID かアクティブ枠が既に使われていれば `StateConflict`。
    async fn commit(self: Box<Self>, job: NewJob) -> Result<Job, SyncError>;
}

/// 1件の終端ジョブを上流へ報告する排他権
#[async_trait]
pub(crate) trait ReportClaim: Send {
    fn job(&self) -> &Job;

    /// 報告済みマーカーを立てる。既に立っていれば `false`。
    async fn mark_reported(self: Box<Self>) -> Result<bool, SyncError>;
}

/// JobDao - ジョブ管理のためのデータアクセス層
#[async_trait]
pub(crate) trait JobDao: Send + Sync {
    /// アドバイザリロックを取得し、起動用のクレームを返す
    ///
    /// - `Ok(Some(claim))`: ロック取得成功
    /// - `Ok(None)`: 他のワーカーが同じテストケースを起動中
    /// - `Err(NotFound)`: テストケースが存在しない
    async fn begin_launch(
        &self,
        testcase_number: i64,
    ) -> Result<Option<Box<dyn LaunchClaim>>, SyncError>;

    async fn find_job(&self, remote_job_id: &str) -> Result<Option<Job>, SyncError>;

    /// 非終端ジョブの途中経過を保存する。終端済みなら何もせず `false`。
    async fn record_progress(
        &self,
        remote_job_id: &str,
        progress: &JobProgress,
    ) -> Result<bool, SyncError>;

    /// 終端状態を記録し、最新ジョブであればテストケースの状態も更新する（アトミック）
    ///
    /// 既に終端済みなら `false` を返し、何も変更しない。
    async fn record_terminal(
        &self,
        remote_job_id: &str,
        observation: &TerminalObservation,
    ) -> Result<bool, SyncError>;

    /// 報告用のクレームを取得する。`None` は他のワーカーが報告中。
    async fn begin_report(
        &self,
        remote_job_id: &str,
    ) -> Result<Option<Box<dyn ReportClaim>>, SyncError>;

    /// 終端済みで未報告のジョブを古い順に返す
    async fn unreported_terminal_jobs(&self, limit: i64) -> Result<Vec<Job>, SyncError>;

    /// 生きている monitor タスクを持たない非終端ジョブ
    async fn unmonitored_active_jobs(&self) -> Result<Vec<Job>, SyncError>;

    async fn count_jobs(&self) -> Result<i64, SyncError>;

    async fn count_unreported_jobs(&self) -> Result<i64, SyncError>;
}
