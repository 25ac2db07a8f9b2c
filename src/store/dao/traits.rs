//! DAO trait definitions
//!
//! One focused trait per table. `SyncDao` bundles them for the components that
//! need the whole store.

mod job;
mod task;
mod test_case;

use async_trait::async_trait;

use crate::error::SyncError;

pub(crate) use job::{JobDao, LaunchClaim, ReportClaim};
pub(crate) use task::TaskDao;
pub(crate) use test_case::TestCaseDao;

#[async_trait]
pub(crate) trait SyncDao: TestCaseDao + JobDao + TaskDao {
    /// Round-trips the store. Used by the readiness probe.
    async fn ping(&self) -> Result<(), SyncError>;
}
