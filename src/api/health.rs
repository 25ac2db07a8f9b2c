use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tracing::{error, warn};

use crate::app::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) struct HealthReport {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl HealthReport {
    fn ready(detail: Option<String>) -> Self {
        Self {
            status: "ready",
            detail,
        }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: "degraded",
            detail: Some(detail.into()),
        }
    }
}

/// DB に到達できなければ 503。OpenQA の不調は detail に載せるだけで ready のまま。
pub(crate) async fn ready(
    State(state): State<AppState>,
) -> Result<Json<HealthReport>, (StatusCode, Json<HealthReport>)> {
    if let Err(error) = state.dao().ping().await {
        error!(%error, "database readiness check failed");
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthReport::degraded(format!("database: {error}"))),
        ));
    }

    let detail = match state.farm().ping().await {
        Ok(()) => None,
        Err(error) => {
            warn!(%error, "openqa readiness check failed");
            Some(format!("openqa: {error}"))
        }
    };

    Ok(Json(HealthReport::ready(detail)))
}

pub(crate) async fn live() -> Json<HealthReport> {
    Json(HealthReport {
        status: "live",
        detail: None,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::api::test_support::{app, send};
    use crate::store::dao::mock::MockSyncDao;

    #[tokio::test]
    async fn live_always_answers() {
        let (status, body) = send(app(&MockSyncDao::new()), "GET", "/health/live").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "live"}));
    }

    #[tokio::test]
    async fn ready_when_database_reachable() {
        let (status, body) = send(app(&MockSyncDao::new()), "GET", "/health/ready").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn degraded_with_reason_when_database_down() {
        let dao = MockSyncDao::new();
        dao.fail_ping("connection refused");

        let (status, body) = send(app(&dao), "GET", "/health/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert!(
            body["detail"]
                .as_str()
                .is_some_and(|detail| detail.contains("connection refused"))
        );
    }
}
