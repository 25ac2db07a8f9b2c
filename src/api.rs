pub(crate) mod dashboard;
pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod tasks;
pub(crate) mod testcases;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::app::AppState;
use crate::error::SyncError;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/v1/testcases", get(testcases::list))
        .route("/v1/testcases/{number}", get(testcases::get_one))
        .route("/v1/testcases/{number}/sync", post(tasks::sync_one))
        .route("/v1/testcases/{number}/run", post(tasks::run_one))
        .route("/v1/jobs/{remote_job_id}", get(testcases::get_job))
        .route("/v1/tasks/sync-all", post(tasks::sync_all))
        .route("/v1/tasks/report-results", post(tasks::report_results))
        .route("/v1/tasks/reconcile", post(tasks::reconcile))
        .route("/v1/tasks/run-pending/{limit}", post(tasks::run_pending))
        .route("/v1/tasks/{task_id}", get(tasks::status))
        .route("/v1/dashboard", get(dashboard::summary))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

/// ハンドラ共通のエラー応答。
#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    Sync(SyncError),
}

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        ApiError::Sync(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: message,
                    kind: "bad_request",
                },
            ),
            ApiError::Sync(error) => {
                let status = match &error {
                    SyncError::NotFound { .. } => StatusCode::NOT_FOUND,
                    SyncError::StateConflict(_) => StatusCode::CONFLICT,
                    SyncError::RemoteRejected { .. } | SyncError::InvalidResponse { .. } => {
                        StatusCode::BAD_GATEWAY
                    }
                    SyncError::RemoteUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    SyncError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status.is_server_error() {
                    error!(error = %error, kind = error.kind(), "request failed");
                } else {
                    warn!(error = %error, kind = error.kind(), "request rejected");
                }
                (
                    status,
                    ErrorBody {
                        error: error.to_string(),
                        kind: error.kind(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
