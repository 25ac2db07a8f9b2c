use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use super::ApiError;
use crate::app::AppState;
use crate::error::SyncError;
use crate::store::models::{Job, TestCase, TestCaseStatus};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    status: Option<String>,
    skip: Option<i64>,
    limit: Option<i64>,
}

/// テストケース一覧（業務キー順）
pub(crate) async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<TestCase>>, ApiError> {
    let status = match params.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            TestCaseStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {raw}")))?,
        ),
    };
    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let cases = state.dao().list_test_cases(status, skip, limit).await?;
    Ok(Json(cases))
}

pub(crate) async fn get_one(
    State(state): State<AppState>,
    Path(testcase_number): Path<i64>,
) -> Result<Json<TestCase>, ApiError> {
    state
        .dao()
        .find_test_case_by_number(testcase_number)
        .await?
        .map(Json)
        .ok_or_else(|| SyncError::not_found("test case", testcase_number).into())
}

pub(crate) async fn get_job(
    State(state): State<AppState>,
    Path(remote_job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .dao()
        .find_job(&remote_job_id)
        .await?
        .map(Json)
        .ok_or_else(|| SyncError::not_found("job", &remote_job_id).into())
}
