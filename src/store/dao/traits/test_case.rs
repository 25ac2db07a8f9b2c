//! TestCaseDao trait - test case mirror operations

use async_trait::async_trait;

use crate::error::SyncError;
use crate::store::models::{NewTestCase, TestCase, TestCaseStatus};

#[async_trait]
pub(crate) trait TestCaseDao: Send + Sync {
    /// 業務キーが未登録の場合のみ `pending` で作成する。作成したら `true`。
    async fn insert_test_case_if_absent(&self, case: &NewTestCase) -> Result<bool, SyncError>;

    async fn count_test_cases(&self) -> Result<i64, SyncError>;

    async fn find_test_case_by_number(
        &self,
        testcase_number: i64,
    ) -> Result<Option<TestCase>, SyncError>;

    /// 業務キー順にページングして返す
    async fn list_test_cases(
        &self,
        status: Option<TestCaseStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TestCase>, SyncError>;

    async fn count_by_status(&self) -> Result<Vec<(TestCaseStatus, i64)>, SyncError>;
}
