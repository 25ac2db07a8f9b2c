use std::collections::BTreeMap;

use axum::{Json, extract::State};
use serde::Serialize;

use super::ApiError;
use crate::app::AppState;
use crate::store::models::TestCaseStatus;

#[derive(Debug, Serialize)]
pub(crate) struct DashboardSummary {
    test_cases: BTreeMap<&'static str, i64>,
    total_test_cases: i64,
    total_jobs: i64,
    unreported_jobs: i64,
    open_tasks: i64,
}

/// ステータス別件数と未報告ジョブ数
pub(crate) async fn summary(
    State(state): State<AppState>,
) -> Result<Json<DashboardSummary>, ApiError> {
    let dao = state.dao();

    let mut test_cases: BTreeMap<&'static str, i64> = TestCaseStatus::ALL
        .iter()
        .map(|status| (status.as_str(), 0))
        .collect();
    for (status, count) in dao.count_by_status().await? {
        test_cases.insert(status.as_str(), count);
    }

    Ok(Json(DashboardSummary {
        total_test_cases: test_cases.values().sum(),
        test_cases,
        total_jobs: dao.count_jobs().await?,
        unreported_jobs: dao.count_unreported_jobs().await?,
        open_tasks: state.queue().store().open_count().await?,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::{app, send};
    use crate::store::dao::mock::MockSyncDao;

    #[tokio::test]
    async fn zero_counts_for_every_status() {
        let dao = MockSyncDao::new();
        dao.seed_test_case(1, "boot");
        dao.seed_test_case(2, "install");

        let (status, body) = send(app(&dao), "GET", "/v1/dashboard").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["test_cases"],
            json!({
                "blocked": 0, "failed": 0, "passed": 0,
                "pending": 2, "running": 0, "skipped": 0
            })
        );
        assert_eq!(body["total_test_cases"], 2);
        assert_eq!(body["total_jobs"], 0);
        assert_eq!(body["unreported_jobs"], 0);
        assert_eq!(body["open_tasks"], 0);
    }

    #[tokio::test]
    async fn open_tasks_counts_queued_work() {
        let dao = MockSyncDao::new();
        send(app(&dao), "POST", "/v1/tasks/reconcile").await;

        let (_, body) = send(app(&dao), "GET", "/v1/dashboard").await;

        assert_eq!(body["open_tasks"], 1);
    }
}
