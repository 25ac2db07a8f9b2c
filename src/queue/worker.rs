use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::TaskHandler;
use super::store::QueueStore;
use super::types::TaskPayload;
use crate::error::SyncError;
use crate::observability::metrics::Metrics;
use crate::store::models::TaskRecord;

const STORE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub(super) struct WorkerSettings {
    pub(super) retry_delay: Duration,
    pub(super) idle_poll: Duration,
}

/// Background worker that claims and processes queued tasks one at a time
pub(super) struct QueueWorker {
    worker_id: usize,
    store: QueueStore,
    handler: Arc<dyn TaskHandler>,
    settings: WorkerSettings,
    metrics: Arc<Metrics>,
}

impl QueueWorker {
    pub(super) fn new(
        worker_id: usize,
        store: QueueStore,
        handler: Arc<dyn TaskHandler>,
        settings: WorkerSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            worker_id,
            store,
            handler,
            settings,
            metrics,
        }
    }

    /// Run the worker loop until shutdown is signalled
    pub(super) async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = self.worker_id, "starting queue worker");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => self.settings.idle_poll,
                Err(e) => {
                    error!(worker_id = self.worker_id, error = %e, "failed to claim next task");
                    STORE_ERROR_BACKOFF
                }
            };

            tokio::select! {
                () = sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker_id = self.worker_id, "queue worker stopped");
    }

    /// Claims and processes at most one task. Returns whether a task was found.
    pub(super) async fn run_once(&self) -> Result<bool, SyncError> {
        let Some(task) = self.store.claim().await? else {
            self.refresh_depth().await;
            return Ok(false);
        };
        self.process(task).await;
        self.refresh_depth().await;
        Ok(true)
    }

    async fn process(&self, task: TaskRecord) {
        let task_id = task.id;
        let payload = match serde_json::from_value::<TaskPayload>(task.params.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                let message = format!("undecodable task payload: {e}");
                error!(task_id = %task_id, kind = %task.kind, error = %message, "dropping task");
                self.metrics.tasks_failed.inc();
                self.ack(self.store.mark_failed(task_id, &message).await, task_id);
                return;
            }
        };

        info!(
            task_id = %task_id,
            kind = %task.kind,
            retry_count = task.retry_count,
            "processing task"
        );

        let started = Instant::now();
        let outcome = self.handler.handle(payload).await;
        self.metrics
            .task_duration
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => self.succeed(&task, &result).await,
            Err(e) => self.fail(&task, &e).await,
        }
    }

    async fn succeed(&self, task: &TaskRecord, result: &Value) {
        self.metrics.tasks_succeeded.inc();
        debug!(task_id = %task.id, kind = %task.kind, "task succeeded");
        self.ack(self.store.mark_succeeded(task.id, result).await, task.id);
    }

    async fn fail(&self, task: &TaskRecord, e: &SyncError) {
        let error_str = e.to_string();
        let should_retry = e.is_retryable() && task.retry_count < task.max_retries;

        if should_retry {
            let delay = self.retry_delay(task.retry_count);
            self.metrics.tasks_retried.inc();
            warn!(
                task_id = %task.id,
                kind = %task.kind,
                retry_count = task.retry_count + 1,
                max_retries = task.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error_str,
                "task failed, will retry"
            );
            self.ack(
                self.store.mark_retrying(task.id, &error_str, delay).await,
                task.id,
            );
        } else {
            self.metrics.tasks_failed.inc();
            error!(
                task_id = %task.id,
                kind = %task.kind,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                error_kind = e.kind(),
                error = %error_str,
                "task failed permanently"
            );
            self.ack(self.store.mark_failed(task.id, &error_str).await, task.id);
        }
    }

    /// Exponential backoff: retry_delay * 2^min(retry_count, 3)
    fn retry_delay(&self, retry_count: i32) -> Duration {
        let shift = u32::try_from(retry_count.clamp(0, 3)).unwrap_or(0);
        self.settings.retry_delay.saturating_mul(1 << shift)
    }

    fn ack(&self, result: Result<(), SyncError>, task_id: uuid::Uuid) {
        // The row stays `running`; stale-task recovery redelivers it.
        if let Err(store_err) = result {
            error!(
                worker_id = self.worker_id,
                task_id = %task_id,
                error = %store_err,
                "failed to record task outcome"
            );
        }
    }

    #[allow(clippy::cast_precision_loss)]
    async fn refresh_depth(&self) {
        match self.store.open_count().await {
            Ok(depth) => self.metrics.queue_depth.set(depth as f64),
            Err(e) => debug!(error = %e, "failed to read queue depth"),
        }
    }
}
