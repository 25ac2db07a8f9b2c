use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::{
    api,
    clients::{OpenQaClient, OpenQaConfig, TestLinkClient, TestLinkConfig},
    config::Config,
    lifecycle::{
        ExecutionFarm, JobLauncher, JobMonitor, ResultReporter, SyncCoordinator, TestRepository,
    },
    observability::Telemetry,
    queue::{QueueStore, TaskDispatcher, TaskHandler, TaskQueue},
    scheduler::Daemons,
    store::{
        self,
        dao::{PgSyncDao, SyncDao},
    },
};

pub use crate::queue::WorkerPool;

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

/// アプリケーション全体で共有するコンポーネント。
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    pool: Option<PgPool>,
    dao: Arc<dyn SyncDao>,
    farm: Arc<dyn ExecutionFarm>,
    queue: TaskQueue,
    dispatcher: Arc<TaskDispatcher>,
}

impl AppState {
    pub(crate) fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn dao(&self) -> Arc<dyn SyncDao> {
        Arc::clone(&self.registry.dao)
    }

    pub(crate) fn farm(&self) -> Arc<dyn ExecutionFarm> {
        Arc::clone(&self.registry.farm)
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.registry.queue
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化や HTTP クライアント構築が失敗した場合はエラーを返す。
    pub fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.sync_db_max_connections())
            .min_connections(config.sync_db_min_connections())
            .acquire_timeout(config.sync_db_acquire_timeout())
            .test_before_acquire(true)
            .connect_lazy(config.sync_db_dsn())
            .context("failed to configure sync_db connection pool")?;
        let dao: Arc<dyn SyncDao> = Arc::new(PgSyncDao::new(pool.clone()));

        let farm: Arc<dyn ExecutionFarm> = Arc::new(
            OpenQaClient::new(OpenQaConfig::from_config(&config))
                .context("failed to build OpenQA client")?,
        );
        let repository: Arc<dyn TestRepository> = Arc::new(
            TestLinkClient::new(TestLinkConfig::from_config(&config))
                .context("failed to build TestLink client")?,
        );

        let mut registry = Self::from_parts(config, telemetry, dao, farm, repository);
        registry.pool = Some(pool);
        Ok(registry)
    }

    /// 外部システム実装を差し替えてレジストリを組み立てる。
    pub(crate) fn from_parts(
        config: Arc<Config>,
        telemetry: Telemetry,
        dao: Arc<dyn SyncDao>,
        farm: Arc<dyn ExecutionFarm>,
        repository: Arc<dyn TestRepository>,
    ) -> Self {
        let metrics = telemetry.metrics();
        let queue = TaskQueue::new(
            QueueStore::new(Arc::clone(&dao)),
            config.queue_max_retries(),
        );

        let launcher = Arc::new(JobLauncher::new(
            Arc::clone(&dao),
            Arc::clone(&farm),
            config.execution_profile().clone(),
            Arc::clone(&metrics),
        ));
        let monitor = Arc::new(JobMonitor::new(
            Arc::clone(&dao),
            Arc::clone(&farm),
            crate::util::retry::RetryConfig::from_config(&config),
            Arc::clone(&metrics),
        ));
        let reporter = Arc::new(ResultReporter::new(
            Arc::clone(&dao),
            Arc::clone(&repository),
            config.testlink_key_prefix(),
            Arc::clone(&metrics),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&dao),
            repository,
            launcher,
            queue.clone(),
            metrics,
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            coordinator,
            monitor,
            reporter,
            queue.clone(),
            config.monitor_poll_interval(),
            config.report_batch_limit(),
            config.queue_stale_after(),
        ));

        Self {
            config,
            telemetry,
            pool: None,
            dao,
            farm,
            queue,
            dispatcher,
        }
    }

    /// スキーマを最新化する。
    ///
    /// # Errors
    /// DB に接続できない、またはマイグレーションが失敗した場合はエラーを返す。
    pub async fn migrate(&self) -> Result<()> {
        if let Some(pool) = &self.pool {
            store::migrate(pool).await?;
            info!("sync_db migrations applied");
        }
        Ok(())
    }

    /// キューワーカーを起動する。
    #[must_use]
    pub fn spawn_workers(&self) -> WorkerPool {
        WorkerPool::spawn(
            self.queue.store().clone(),
            Arc::clone(&self.dispatcher) as Arc<dyn TaskHandler>,
            &self.config,
            self.telemetry.metrics(),
        )
    }

    /// 定期トリガーを起動する。
    #[must_use]
    pub fn spawn_daemons(&self) -> Daemons {
        Daemons::spawn(&self.queue, &self.config)
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}

pub fn build_router(registry: Arc<ComponentRegistry>) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::lifecycle::fakes::{FakeFarm, FakeRepository};
    use crate::store::dao::mock::MockSyncDao;

    /// モック DAO とフェイク外部システムで組んだレジストリ。
    pub(crate) fn test_registry(
        dao: &MockSyncDao,
        farm: Arc<FakeFarm>,
        repository: Arc<FakeRepository>,
    ) -> ComponentRegistry {
        ComponentRegistry::from_parts(
            Arc::new(test_config()),
            Telemetry::metrics_only().expect("telemetry"),
            Arc::new(dao.clone()),
            farm,
            repository,
        )
    }

    #[tokio::test]
    async fn migrate_without_pool_is_noop() {
        let registry = test_registry(
            &MockSyncDao::new(),
            Arc::new(FakeFarm::default()),
            Arc::new(FakeRepository::default()),
        );

        registry.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn spawned_workers_drain_enqueued_tasks() {
        let dao = MockSyncDao::new();
        dao.seed_test_case(42, "boot");
        let farm = Arc::new(FakeFarm::with_ids(["J100"]));
        let registry = test_registry(&dao, farm, Arc::new(FakeRepository::default()));
        registry
            .queue
            .enqueue(crate::queue::TaskPayload::Launch {
                testcase_number: 42,
            })
            .await
            .unwrap();

        let workers = registry.spawn_workers();
        for _ in 0..50 {
            if !dao.jobs().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        workers.shutdown().await;

        assert_eq!(dao.jobs()[0].remote_job_id, "J100");
    }

    #[tokio::test]
    async fn component_registry_builds_with_lazy_pool() {
        let registry = ComponentRegistry::build(test_config());

        assert!(registry.is_ok());
    }
}
