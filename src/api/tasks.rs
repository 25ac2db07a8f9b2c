//! Endpoints that enqueue background work and report on it.
//!
//! Every trigger returns `202 {task_id}` immediately; the worker pool does the rest.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use tracing::info;

use super::ApiError;
use crate::app::AppState;
use crate::error::SyncError;
use crate::queue::{TaskHandle, TaskPayload, TaskView};

const MAX_RUN_PENDING: i64 = 1000;

#[derive(Debug, Serialize)]
pub(crate) struct Accepted {
    task_id: TaskHandle,
}

async fn accept(
    state: &AppState,
    payload: TaskPayload,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let kind = payload.kind();
    let task_id = state.queue().enqueue(payload).await?;
    info!(%task_id, kind, "task accepted");
    Ok((StatusCode::ACCEPTED, Json(Accepted { task_id })))
}

pub(crate) async fn sync_one(
    State(state): State<AppState>,
    Path(testcase_number): Path<i64>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    accept(&state, TaskPayload::Sync { testcase_number }).await
}

pub(crate) async fn run_one(
    State(state): State<AppState>,
    Path(testcase_number): Path<i64>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    accept(&state, TaskPayload::Launch { testcase_number }).await
}

pub(crate) async fn sync_all(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    accept(&state, TaskPayload::SyncAll).await
}

pub(crate) async fn report_results(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    accept(&state, TaskPayload::BulkReport).await
}

pub(crate) async fn reconcile(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    accept(&state, TaskPayload::Reconcile).await
}

pub(crate) async fn run_pending(
    State(state): State<AppState>,
    Path(limit): Path<i64>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    if !(1..=MAX_RUN_PENDING).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_RUN_PENDING}"
        )));
    }
    accept(&state, TaskPayload::LaunchPending { limit }).await
}

pub(crate) async fn status(
    State(state): State<AppState>,
    Path(task_id): Path<TaskHandle>,
) -> Result<Json<TaskView>, ApiError> {
    state
        .queue()
        .status(task_id)
        .await?
        .map(Json)
        .ok_or_else(|| SyncError::not_found("task", task_id).into())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use rstest::rstest;

    use crate::api::test_support::{app, send};
    use crate::store::dao::mock::MockSyncDao;

    #[rstest]
    #[case("/v1/testcases/42/sync", "sync")]
    #[case("/v1/testcases/42/run", "launch")]
    #[case("/v1/tasks/sync-all", "sync_all")]
    #[case("/v1/tasks/report-results", "bulk_report")]
    #[case("/v1/tasks/reconcile", "reconcile")]
    #[case("/v1/tasks/run-pending/5", "launch_pending")]
    #[tokio::test]
    async fn trigger_enqueues_and_returns_handle(#[case] uri: &str, #[case] kind: &str) {
        let dao = MockSyncDao::new();

        let (status, body) = send(app(&dao), "POST", uri).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let tasks = dao.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, kind);
        assert_eq!(body["task_id"], tasks[0].id.to_string());
    }

    #[tokio::test]
    async fn run_pending_rejects_zero_limit() {
        let dao = MockSyncDao::new();

        let (status, body) = send(app(&dao), "POST", "/v1/tasks/run-pending/0").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");
        assert!(dao.tasks().is_empty());
    }

    #[tokio::test]
    async fn status_of_enqueued_task_is_pending() {
        let dao = MockSyncDao::new();
        let (_, accepted) = send(app(&dao), "POST", "/v1/tasks/reconcile").await;
        let task_id = accepted["task_id"].as_str().unwrap().to_string();

        let (status, body) = send(app(&dao), "GET", &format!("/v1/tasks/{task_id}")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["kind"], "reconcile");
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let (status, body) = send(
            app(&MockSyncDao::new()),
            "GET",
            "/v1/tasks/0190a5b2-7c1e-7d3a-9f00-000000000001",
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }
}
