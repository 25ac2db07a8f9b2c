/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Gauge, Histogram, HistogramOpts, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // ジョブライフサイクル
    pub launches: Counter,
    pub launch_conflicts: Counter,
    pub polls: Counter,
    pub poll_failures: Counter,
    pub terminal_transitions: Counter,
    pub reports_sent: Counter,
    pub report_failures: Counter,
    pub test_cases_synced: Counter,

    // タスクキュー
    pub tasks_succeeded: Counter,
    pub tasks_retried: Counter,
    pub tasks_failed: Counter,
    pub task_duration: Histogram,
    pub queue_depth: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    ///
    /// # Errors
    /// 同じ名前のメトリクスが既にレジストリに登録されている場合はエラーを返す。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            launches: register_counter_with_registry!(
                "openqa_sync_launches_total",
                "OpenQA jobs launched for test cases",
                registry
            )?,
            launch_conflicts: register_counter_with_registry!(
                "openqa_sync_launch_conflicts_total",
                "Launch requests resolved as no-ops because a job was already active",
                registry
            )?,
            polls: register_counter_with_registry!(
                "openqa_sync_polls_total",
                "Remote job state fetches",
                registry
            )?,
            poll_failures: register_counter_with_registry!(
                "openqa_sync_poll_failures_total",
                "Remote job state fetches that failed",
                registry
            )?,
            terminal_transitions: register_counter_with_registry!(
                "openqa_sync_terminal_transitions_total",
                "Jobs observed reaching a terminal state",
                registry
            )?,
            reports_sent: register_counter_with_registry!(
                "openqa_sync_reports_sent_total",
                "Results reported to TestLink",
                registry
            )?,
            report_failures: register_counter_with_registry!(
                "openqa_sync_report_failures_total",
                "Result reports that TestLink did not accept",
                registry
            )?,
            test_cases_synced: register_counter_with_registry!(
                "openqa_sync_test_cases_synced_total",
                "Test cases created locally by sync",
                registry
            )?,
            tasks_succeeded: register_counter_with_registry!(
                "openqa_sync_tasks_succeeded_total",
                "Background tasks completed successfully",
                registry
            )?,
            tasks_retried: register_counter_with_registry!(
                "openqa_sync_tasks_retried_total",
                "Background tasks rescheduled after a retryable failure",
                registry
            )?,
            tasks_failed: register_counter_with_registry!(
                "openqa_sync_tasks_failed_total",
                "Background tasks that failed permanently",
                registry
            )?,
            task_duration: register_histogram_with_registry!(
                HistogramOpts::new(
                    "openqa_sync_task_duration_seconds",
                    "Duration of a single background task"
                )
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
                registry
            )?,
            queue_depth: register_gauge_with_registry!(
                "openqa_sync_queue_depth",
                "Open tasks (pending, running or retrying)",
                registry
            )?,
        })
    }
}
