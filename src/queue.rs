//! Durable background task queue.
//!
//! Tasks live in `sync_tasks`; any number of worker processes claim them with
//! `FOR UPDATE SKIP LOCKED`. A task is acknowledged only after its handler has
//! committed its state changes, so a crash means redelivery, never loss.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SyncError;
use crate::observability::metrics::Metrics;

mod dispatch;
mod store;
mod types;
mod worker;

pub(crate) use dispatch::TaskDispatcher;
pub(crate) use store::QueueStore;
pub(crate) use types::{TaskHandle, TaskPayload, TaskView};
use worker::{QueueWorker, WorkerSettings};

/// Executes one decoded task. Returns the JSON result stored on the task row.
#[async_trait]
pub(crate) trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: TaskPayload) -> Result<Value, SyncError>;
}

/// Enqueue side of the queue, shared by the API, the scheduler and the lifecycle engine.
#[derive(Clone)]
pub(crate) struct TaskQueue {
    store: QueueStore,
    max_retries: i32,
}

impl TaskQueue {
    pub(crate) fn new(store: QueueStore, max_retries: i32) -> Self {
        Self { store, max_retries }
    }

    pub(crate) async fn enqueue(&self, payload: TaskPayload) -> Result<TaskHandle, SyncError> {
        self.enqueue_after(payload, Duration::ZERO).await
    }

    /// Enqueue a task that no worker claims before `delay` has elapsed.
    pub(crate) async fn enqueue_after(
        &self,
        payload: TaskPayload,
        delay: Duration,
    ) -> Result<TaskHandle, SyncError> {
        let handle = self.store.enqueue(&payload, self.max_retries, delay).await?;
        debug!(
            task_id = %handle,
            kind = payload.kind(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "task enqueued"
        );
        Ok(handle)
    }

    pub(crate) async fn status(&self, handle: TaskHandle) -> Result<Option<TaskView>, SyncError> {
        self.store.status(handle).await
    }

    pub(crate) fn store(&self) -> &QueueStore {
        &self.store
    }
}

/// Running queue workers.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn spawn(
        store: QueueStore,
        handler: Arc<dyn TaskHandler>,
        config: &Config,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (shutdown, receiver) = watch::channel(false);
        let settings = WorkerSettings {
            retry_delay: Duration::from_millis(config.queue_retry_delay_ms()),
            idle_poll: config.queue_idle_poll(),
        };
        let concurrency = config.queue_concurrency().get();

        // Start worker tasks (one per concurrency slot)
        let workers = (0..concurrency)
            .map(|worker_id| {
                let worker = QueueWorker::new(
                    worker_id,
                    store.clone(),
                    Arc::clone(&handler),
                    settings,
                    Arc::clone(&metrics),
                );
                let receiver = receiver.clone();
                tokio::spawn(async move { worker.run(receiver).await })
            })
            .collect();

        info!(
            concurrency,
            retry_delay_ms = config.queue_retry_delay_ms(),
            max_retries = config.queue_max_retries(),
            "task queue workers started"
        );

        Self { shutdown, workers }
    }

    /// Signals every worker to stop after its current task and waits for them.
    pub async fn shutdown(self) {
        info!("shutting down task queue workers");
        if self.shutdown.send(true).is_err() {
            debug!("all workers already exited");
        }
        for result in join_all(self.workers).await {
            if let Err(error) = result {
                warn!(error = %error, "queue worker ended abnormally");
            }
        }
        info!("all task queue workers stopped");
    }
}
