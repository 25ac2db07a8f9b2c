/// 指数バックオフ+ジッター付き再試行ロジック。
///
/// Full Jitter 戦略。OpenQA のジョブ状態取得とキューの再スケジュールで共有する。
use std::time::Duration;

use rand::Rng;

use crate::config::Config;

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryConfig {
    /// 最大試行回数（初回を含む）
    pub(crate) max_attempts: usize,
    /// ベースとなる遅延時間（ミリ秒）
    pub(crate) base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）
    pub(crate) max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 10000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub(crate) const fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// HTTP_* 設定から組み立てる。`HTTP_MAX_RETRIES` は初回を含まない回数。
    #[must_use]
    pub(crate) fn from_config(config: &Config) -> Self {
        Self::new(
            config.http_max_retries().saturating_add(1),
            config.http_backoff_base_ms(),
            config.http_backoff_cap_ms(),
        )
    }

    /// 指定された試行回数に対する遅延時間を計算する（Full Jitter戦略）。
    ///
    /// `attempt` は 0 始まり。0 のときは待たない。
    #[must_use]
    pub(crate) fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let capped_delay = self.capped_delay_ms(attempt);

        // Full Jitter: random(0, capped_delay)
        let jittered_delay = if capped_delay > 0 {
            rand::rng().random_range(0..=capped_delay)
        } else {
            0
        };

        Duration::from_millis(jittered_delay)
    }

    fn capped_delay_ms(&self, attempt: usize) -> u64 {
        // base * 2^(attempt-1)
        let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX).min(32);
        let exponential_delay = self
            .base_delay_ms
            .saturating_mul(1_u64.checked_shl(shift).unwrap_or(u64::MAX));

        exponential_delay.min(self.max_delay_ms)
    }

    /// この試行回数が再試行可能かどうかを判定する。
    #[must_use]
    pub(crate) const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// reqwest のエラーが一時的なものか判定する。
///
/// - ネットワークエラー / タイムアウト
/// - 5xx
/// - 429 Too Many Requests
pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        return true;
    }

    if let Some(status) = error.status() {
        return is_retryable_status(status);
    }

    false
}

pub(crate) fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}
