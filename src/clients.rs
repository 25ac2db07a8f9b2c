//! HTTP clients for OpenQA and TestLink, plus the error classification they share.

pub(crate) mod openqa;
pub(crate) mod testlink;

pub(crate) use openqa::{OpenQaClient, OpenQaConfig};
pub(crate) use testlink::{TestLinkClient, TestLinkConfig};

use anyhow::{Context, Result};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::error::SyncError;
use crate::util::retry::{is_retryable_error, is_retryable_status};

const MAX_ERROR_BODY: usize = 512;

/// ベースURLをパースし、相対パスの join が効くよう末尾に `/` を付ける。
pub(crate) fn parse_base_url(raw: &str) -> Result<Url> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).with_context(|| format!("invalid base URL: {raw}"))
}

pub(crate) fn endpoint(system: &'static str, base: &Url, path: &str) -> Result<Url, SyncError> {
    base.join(path).map_err(|error| SyncError::InvalidResponse {
        system,
        message: format!("cannot build URL for {path}: {error}"),
    })
}

/// reqwest の送信エラーを分類する。
pub(crate) fn transport_error(system: &'static str, error: &reqwest::Error) -> SyncError {
    if error.is_decode() {
        return SyncError::InvalidResponse {
            system,
            message: error.to_string(),
        };
    }
    if is_retryable_error(error) {
        return SyncError::RemoteUnavailable {
            system,
            message: error.to_string(),
        };
    }
    match error.status() {
        Some(status) => SyncError::RemoteRejected {
            system,
            status: status.as_u16(),
            body: error.to_string(),
        },
        None => SyncError::RemoteUnavailable {
            system,
            message: error.to_string(),
        },
    }
}

/// 2xx 以外の応答をエラーに変換する。
///
/// `lookup` を渡した場合、404 は `NotFound` になる。
pub(crate) async fn check_status(
    system: &'static str,
    response: Response,
    lookup: Option<(&'static str, &str)>,
) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        body.truncate(cut);
    }

    if status == StatusCode::NOT_FOUND {
        if let Some((entity, key)) = lookup {
            return Err(SyncError::not_found(entity, key));
        }
    }
    if is_retryable_status(status) {
        return Err(SyncError::RemoteUnavailable {
            system,
            message: format!("status {status}: {body}"),
        });
    }
    Err(SyncError::RemoteRejected {
        system,
        status: status.as_u16(),
        body,
    })
}

pub(crate) async fn decode<T: DeserializeOwned>(
    system: &'static str,
    response: Response,
) -> Result<T, SyncError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|error| transport_error(system, &error))?;
    serde_json::from_slice(&bytes).map_err(|error| SyncError::InvalidResponse {
        system,
        message: error.to_string(),
    })
}
