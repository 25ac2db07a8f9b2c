/// TestLink REST API クライアント。
///
/// テストケース定義の取得と実行結果の登録を行う。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{check_status, decode, endpoint, parse_base_url, transport_error};
use crate::config::Config;
use crate::error::{SyncError, TESTLINK};
use crate::lifecycle::{ResultReport, TestCaseDefinition, TestRepository};

/// TestLink の実行種別。2 = automated
const EXECUTION_TYPE_AUTOMATED: u8 = 2;

#[derive(Debug, Clone)]
pub(crate) struct TestLinkConfig {
    pub(crate) base_url: String,
    pub(crate) devkey: String,
    pub(crate) tls_insecure: bool,
    pub(crate) timeout: Duration,
    pub(crate) project_id: Option<i64>,
    pub(crate) plan_id: Option<i64>,
    pub(crate) build_id: Option<i64>,
}

impl TestLinkConfig {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.testlink_base_url().to_string(),
            devkey: config.testlink_devkey().to_string(),
            tls_insecure: config.testlink_tls_insecure(),
            timeout: config.testlink_timeout(),
            project_id: config.testlink_project_id(),
            plan_id: config.testlink_plan_id(),
            build_id: config.testlink_build_id(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TestCaseBody {
    name: String,
    preconditions: Option<String>,
    #[serde(default)]
    steps: Value,
    testsuite_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    Items { items: Vec<T> },
    One(T),
}

impl<T> OneOrMany<T> {
    fn into_first(self) -> Option<T> {
        match self {
            OneOrMany::Many(items) | OneOrMany::Items { items } => items.into_iter().next(),
            OneOrMany::One(item) => Some(item),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlanBody {
    id: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionBody<'a> {
    #[serde(rename = "testPlanID")]
    test_plan_id: i64,
    #[serde(rename = "buildID", skip_serializing_if = "Option::is_none")]
    build_id: Option<i64>,
    #[serde(rename = "testCaseExternalID")]
    test_case_external_id: &'a str,
    status_code: &'static str,
    notes: &'a str,
    execution_type: u8,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionAck {
    status: Option<String>,
    message: Option<String>,
}

/// TestLinkとの通信を管理するクライアント。
#[derive(Debug)]
pub(crate) struct TestLinkClient {
    client: Client,
    base_url: Url,
    project_id: Option<i64>,
    plan_id: Option<i64>,
    build_id: Option<i64>,
    resolved_plan: OnceCell<i64>,
}

impl TestLinkClient {
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(config: TestLinkConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let devkey =
            HeaderValue::from_str(&config.devkey).context("TESTLINK_DEVKEY is not a valid header")?;
        headers.insert(HeaderName::from_static("apikey"), devkey);

        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.tls_insecure)
            .default_headers(headers)
            .build()
            .context("failed to build TestLink HTTP client")?;

        let base_url = parse_base_url(&config.base_url).context("invalid TestLink base URL")?;

        Ok(Self {
            client,
            base_url,
            project_id: config.project_id,
            plan_id: config.plan_id,
            build_id: config.build_id,
            resolved_plan: OnceCell::new(),
        })
    }

    /// プロジェクトの最初のテスト計画を取得する。
    async fn first_plan(&self, project_id: i64) -> Result<i64, SyncError> {
        let url = endpoint(
            TESTLINK,
            &self.base_url,
            &format!("testprojects/{project_id}/testplans"),
        )?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| transport_error(TESTLINK, &error))?;
        let key = project_id.to_string();
        let response = check_status(TESTLINK, response, Some(("test project", &key))).await?;
        let plans: OneOrMany<PlanBody> = decode(TESTLINK, response).await?;

        let plan = plans
            .into_first()
            .ok_or_else(|| SyncError::not_found("test plan", format!("project {project_id}")))?;
        let plan_id = as_i64(&plan.id).ok_or_else(|| SyncError::InvalidResponse {
            system: TESTLINK,
            message: format!("test plan id is not numeric: {}", plan.id),
        })?;

        info!(project_id, plan_id, "resolved TestLink test plan");
        Ok(plan_id)
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[async_trait]
impl TestRepository for TestLinkClient {
    async fn fetch_test_case(&self, external_id: &str) -> Result<TestCaseDefinition, SyncError> {
        let url = endpoint(TESTLINK, &self.base_url, &format!("testcases/{external_id}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| transport_error(TESTLINK, &error))?;
        let response =
            check_status(TESTLINK, response, Some(("testlink test case", external_id))).await?;
        let body: OneOrMany<TestCaseBody> = decode(TESTLINK, response).await?;
        let case = body
            .into_first()
            .ok_or_else(|| SyncError::not_found("testlink test case", external_id))?;

        debug!(external_id, name = %case.name, "fetched TestLink test case");
        Ok(TestCaseDefinition {
            name: case.name,
            preconditions: case.preconditions.filter(|p| !p.trim().is_empty()),
            steps: if case.steps.is_null() {
                Value::Array(Vec::new())
            } else {
                case.steps
            },
            suite_id: case.testsuite_id.as_ref().and_then(as_i64),
        })
    }

    async fn resolve_plan_id(&self) -> Result<i64, SyncError> {
        if let Some(plan_id) = self.plan_id {
            return Ok(plan_id);
        }
        let Some(project_id) = self.project_id else {
            return Err(SyncError::not_found(
                "test plan",
                "neither TESTLINK_PLAN_ID nor TESTLINK_PROJECT_ID is set",
            ));
        };
        self.resolved_plan
            .get_or_try_init(|| self.first_plan(project_id))
            .await
            .copied()
    }

    async fn report_result(&self, report: &ResultReport) -> Result<(), SyncError> {
        let url = endpoint(TESTLINK, &self.base_url, "executions")?;
        let body = ExecutionBody {
            test_plan_id: report.plan_id,
            build_id: self.build_id,
            test_case_external_id: &report.external_id,
            status_code: report.code.wire_code(),
            notes: &report.notes,
            execution_type: EXECUTION_TYPE_AUTOMATED,
        };
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|error| transport_error(TESTLINK, &error))?;
        let response = check_status(TESTLINK, response, None).await?;
        let status = response.status().as_u16();

        // TestLink は 200 のまま本文で失敗を返すことがある
        let text = response
            .text()
            .await
            .map_err(|error| transport_error(TESTLINK, &error))?;
        let ack: ExecutionAck = serde_json::from_str(&text).unwrap_or_default();
        if ack.status.as_deref() == Some("ko") {
            return Err(SyncError::RemoteRejected {
                system: TESTLINK,
                status,
                body: ack.message.unwrap_or(text),
            });
        }

        debug!(
            external_id = %report.external_id,
            plan_id = report.plan_id,
            code = report.code.wire_code(),
            "TestLink execution recorded"
        );
        Ok(())
    }
}
