use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use crate::app::AppState;

pub(crate) async fn exporter(State(state): State<AppState>) -> impl IntoResponse {
    match state.telemetry().render_prometheus() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(error) => {
            error!(error = %error, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{error:#}")).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::api::test_support::{app, send};
    use crate::store::dao::mock::MockSyncDao;

    #[tokio::test]
    async fn exposes_sync_counters() {
        let (status, body) = send(app(&MockSyncDao::new()), "GET", "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(
            body.as_str()
                .is_some_and(|text| text.contains("openqa_sync_reports_sent_total"))
        );
    }
}
