use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::queue::{TaskPayload, TaskQueue};
use crate::scheduler::cadence::DailyCadence;

/// 起動中の定期トリガー群。
pub struct Daemons {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Daemons {
    /// 設定に従って定期トリガーを起動する。
    ///
    /// - `sync_all`: `SYNC_INTERVAL_SECS` ごと（キー未設定なら起動しない）
    /// - `reconcile`: `RECONCILE_INTERVAL_SECS` ごと
    /// - `bulk_report`: 毎日 `REPORT_DAILY_HOUR_UTC:REPORT_DAILY_MINUTE_UTC`
    pub(crate) fn spawn(queue: &TaskQueue, config: &Config) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let mut handles = Vec::new();

        if config.testlink_sync_keys().is_empty() {
            warn!("skipping periodic sync daemon because TESTLINK_SYNC_KEYS is empty");
        } else {
            handles.push(
                IntervalDaemon {
                    name: "sync_all",
                    payload: TaskPayload::SyncAll,
                    period: config.sync_interval(),
                    queue: queue.clone(),
                }
                .spawn(rx.clone()),
            );
        }

        handles.push(
            IntervalDaemon {
                name: "reconcile",
                payload: TaskPayload::Reconcile,
                period: config.reconcile_interval(),
                queue: queue.clone(),
            }
            .spawn(rx.clone()),
        );

        match DailyCadence::utc(
            config.report_daily_hour_utc(),
            config.report_daily_minute_utc(),
        ) {
            Some(cadence) => handles.push(
                DailyDaemon {
                    name: "bulk_report",
                    payload: TaskPayload::BulkReport,
                    cadence,
                    queue: queue.clone(),
                }
                .spawn(rx),
            ),
            None => error!(
                hour = config.report_daily_hour_utc(),
                minute = config.report_daily_minute_utc(),
                "invalid daily report time; bulk report daemon not started"
            ),
        }

        Self { shutdown, handles }
    }

    /// 全トリガーを止めて終了を待つ。
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in join_all(self.handles).await {
            if let Err(error) = result {
                error!(error = %error, "scheduler daemon panicked");
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.handles.len()
    }
}

struct IntervalDaemon {
    name: &'static str,
    payload: TaskPayload,
    period: Duration,
    queue: TaskQueue,
}

impl IntervalDaemon {
    fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            daemon = self.name,
            period_seconds = self.period.as_secs(),
            "periodic trigger started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => trigger(self.name, &self.queue, &self.payload).await,
                _ = shutdown.changed() => break,
            }
        }
        info!(daemon = self.name, "periodic trigger stopped");
    }
}

struct DailyDaemon {
    name: &'static str,
    payload: TaskPayload,
    cadence: DailyCadence,
    queue: TaskQueue,
}

impl DailyDaemon {
    fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let now = Utc::now();
            let next = self.cadence.next_run_from(now);
            let wait = duration_until(next, now);
            info!(
                daemon = self.name,
                next_run_utc = %next.to_rfc3339(),
                wait_seconds = wait.as_secs(),
                "scheduled daily trigger"
            );

            tokio::select! {
                () = sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
            trigger(self.name, &self.queue, &self.payload).await;
            // 同じ分の中で二度発火しないように
            tokio::select! {
                () = sleep(Duration::from_secs(60)) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!(daemon = self.name, "daily trigger stopped");
    }
}

async fn trigger(name: &'static str, queue: &TaskQueue, payload: &TaskPayload) {
    match queue.enqueue(payload.clone()).await {
        Ok(task_id) => info!(daemon = name, %task_id, kind = payload.kind(), "periodic task enqueued"),
        Err(error) => error!(daemon = name, error = %error, "failed to enqueue periodic task"),
    }
}

fn duration_until(next: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
