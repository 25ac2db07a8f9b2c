/// OpenQA REST API クライアント。
///
/// ジョブの投入・状態取得・テスト名による検索を行う。
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use super::{check_status, decode, endpoint, parse_base_url, transport_error};
use crate::config::Config;
use crate::error::{OPENQA, SyncError};
use crate::lifecycle::{ExecutionFarm, JobRequest, RemoteJob};

/// OpenQAクライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct OpenQaConfig {
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) tls_insecure: bool,
    pub(crate) connect_timeout: Duration,
    pub(crate) timeout: Duration,
}

impl OpenQaConfig {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.openqa_base_url().to_string(),
            api_key: config.openqa_api_key().map(str::to_string),
            tls_insecure: config.openqa_tls_insecure(),
            connect_timeout: config.openqa_connect_timeout(),
            timeout: config.openqa_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum JobId {
    Number(i64),
    Text(String),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Number(id) => write!(f, "{id}"),
            JobId::Text(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: Option<JobId>,
    #[serde(default)]
    ids: Vec<JobId>,
}

#[derive(Debug, Deserialize)]
struct OpenQaJob {
    id: Option<JobId>,
    state: String,
    result: Option<String>,
    t_started: Option<String>,
    t_finished: Option<String>,
    testurl: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JobEnvelope {
    Wrapped { job: OpenQaJob },
    Bare(OpenQaJob),
}

#[derive(Debug, Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<OpenQaJob>,
}

/// OpenQAとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub(crate) struct OpenQaClient {
    client: Client,
    base_url: Url,
    origin: String,
}

impl OpenQaClient {
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(config: OpenQaConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key).context("OPENQA_API_KEY is not a valid header")?;
            headers.insert(HeaderName::from_static("x-api-key"), value);
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.tls_insecure)
            .default_headers(headers)
            .build()
            .context("failed to build OpenQA HTTP client")?;

        let base_url = parse_base_url(&config.base_url).context("invalid OpenQA base URL")?;
        let origin = base_url.origin().ascii_serialization();

        Ok(Self {
            client,
            base_url,
            origin,
        })
    }

    fn remote_job(&self, job: OpenQaJob, fallback_id: Option<&str>) -> Result<RemoteJob, SyncError> {
        let id = job
            .id
            .map(|id| id.to_string())
            .or_else(|| fallback_id.map(str::to_string))
            .ok_or_else(|| SyncError::InvalidResponse {
                system: OPENQA,
                message: "job without id".to_string(),
            })?;

        let log_url = match job.testurl.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                url.to_string()
            }
            Some(path) => format!("{}/{}", self.origin, path.trim_start_matches('/')),
            None => format!("{}/tests/{id}", self.origin),
        };

        Ok(RemoteJob {
            state: job.state,
            result: job.result.filter(|result| !result.is_empty()),
            started_at: job.t_started.as_deref().and_then(parse_timestamp),
            finished_at: job.t_finished.as_deref().and_then(parse_timestamp),
            log_url: Some(log_url),
            id,
        })
    }
}

/// OpenQA は `2024-05-01T10:00:00` のようなタイムゾーンなしUTCを返すことがある。
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn numeric_id(job: &RemoteJob) -> i64 {
    job.id.parse().unwrap_or(i64::MIN)
}

#[async_trait]
impl ExecutionFarm for OpenQaClient {
    async fn submit_job(&self, request: &JobRequest) -> Result<String, SyncError> {
        let url = endpoint(OPENQA, &self.base_url, "jobs")?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|error| transport_error(OPENQA, &error))?;
        let response = check_status(OPENQA, response, None).await?;
        let body: SubmitResponse = decode(OPENQA, response).await?;

        let id = body
            .id
            .or_else(|| body.ids.into_iter().next())
            .ok_or_else(|| SyncError::InvalidResponse {
                system: OPENQA,
                message: "job submission response carries no id".to_string(),
            })?
            .to_string();

        debug!(remote_job_id = %id, test = %request.test, "OpenQA accepted job");
        Ok(id)
    }

    async fn fetch_job(&self, remote_job_id: &str) -> Result<RemoteJob, SyncError> {
        let url = endpoint(OPENQA, &self.base_url, &format!("jobs/{remote_job_id}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| transport_error(OPENQA, &error))?;
        let response = check_status(OPENQA, response, Some(("openqa job", remote_job_id))).await?;
        let job = match decode::<JobEnvelope>(OPENQA, response).await? {
            JobEnvelope::Wrapped { job } | JobEnvelope::Bare(job) => job,
        };
        self.remote_job(job, Some(remote_job_id))
    }

    async fn find_jobs_by_test(&self, test_name: &str) -> Result<Vec<RemoteJob>, SyncError> {
        let mut url = endpoint(OPENQA, &self.base_url, "jobs")?;
        url.query_pairs_mut().append_pair("test", test_name);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| transport_error(OPENQA, &error))?;
        let response = check_status(OPENQA, response, None).await?;
        let list: JobList = decode(OPENQA, response).await?;

        let mut jobs = list
            .jobs
            .into_iter()
            .map(|job| self.remote_job(job, None))
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|job| std::cmp::Reverse(numeric_id(job)));
        Ok(jobs)
    }

    async fn ping(&self) -> Result<(), SyncError> {
        let mut url = endpoint(OPENQA, &self.base_url, "jobs")?;
        url.query_pairs_mut().append_pair("limit", "1");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| transport_error(OPENQA, &error))?;
        check_status(OPENQA, response, None).await?;
        Ok(())
    }
}
