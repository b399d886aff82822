//! Engine wiring shared by the HTTP handlers and the worker/beat roles.

use std::sync::Arc;

use serde::Serialize;

use printopt_core::{EntityKey, TaskId};
use printopt_infra::jobs::{Broker, EagerBroker, InMemoryBroker, TaskRegistry, TaskRunner};
use printopt_infra::results::{InMemoryResultStore, ResultStore};
use printopt_infra::{QueryError, ResultQueryService, SubmissionGateway, SubmitError, TaskView};

#[cfg(feature = "redis")]
use anyhow::Context;
#[cfg(feature = "redis")]
use printopt_infra::jobs::RedisBroker;
#[cfg(feature = "redis")]
use printopt_infra::results::PostgresResultStore;
#[cfg(feature = "redis")]
use sqlx::postgres::PgPoolOptions;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppServices {
    pub gateway: SubmissionGateway,
    pub query: ResultQueryService,
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn ResultStore>,
    pub registry: Arc<TaskRegistry>,
    pub runner: Arc<TaskRunner>,
}

impl AppServices {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn ResultStore>, registry: Arc<TaskRegistry>) -> Self {
        let runner = Arc::new(TaskRunner::new(registry.clone(), store.clone()));
        Self::assemble(broker, store, registry, runner)
    }

    pub fn in_memory(registry: Arc<TaskRegistry>) -> Self {
        Self::new(InMemoryBroker::arc(), InMemoryResultStore::arc(), registry)
    }

    /// Tasks execute inside `submit`; nothing needs to consume the lanes.
    pub fn eager(registry: Arc<TaskRegistry>) -> Self {
        let store: Arc<dyn ResultStore> = InMemoryResultStore::arc();
        let runner = Arc::new(TaskRunner::new(registry.clone(), store.clone()));
        let broker = Arc::new(EagerBroker::new(runner.clone()));
        Self::assemble(broker, store, registry, runner)
    }

    fn assemble(
        broker: Arc<dyn Broker>,
        store: Arc<dyn ResultStore>,
        registry: Arc<TaskRegistry>,
        runner: Arc<TaskRunner>,
    ) -> Self {
        Self {
            gateway: SubmissionGateway::new(broker.clone(), registry.clone()),
            query: ResultQueryService::new(broker.clone(), store.clone()),
            broker,
            store,
            registry,
            runner,
        }
    }

    /// Submit off the async executor; brokers and eager execution block.
    pub async fn submit<I>(
        self: &Arc<Self>,
        task_type: &'static str,
        entity_key: Option<EntityKey>,
        input: I,
    ) -> Result<TaskId, SubmitError>
    where
        I: Serialize + Send + 'static,
    {
        let services = self.clone();
        tokio::task::spawn_blocking(move || match entity_key {
            Some(key) => services.gateway.submit(task_type, key, &input),
            None => services.gateway.submit_unkeyed(task_type, &input),
        })
        .await
        .map_err(|e| SubmitError::BrokerUnavailable(format!("submission aborted: {e}")))?
    }

    pub async fn task_view(self: &Arc<Self>, task_id: TaskId) -> Result<TaskView, QueryError> {
        let services = self.clone();
        tokio::task::spawn_blocking(move || services.query.query(task_id))
            .await
            .map_err(|e| QueryError::BrokerUnavailable(format!("lookup aborted: {e}")))?
    }
}

pub async fn build_services(config: &AppConfig, registry: Arc<TaskRegistry>) -> anyhow::Result<AppServices> {
    if config.use_persistent_stores {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(config, registry).await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    tracing::info!("using in-memory broker and result store");
    Ok(AppServices::in_memory(registry))
}

#[cfg(feature = "redis")]
async fn build_persistent_services(
    config: &AppConfig,
    registry: Arc<TaskRegistry>,
) -> anyhow::Result<AppServices> {
    let (Some(database_url), Some(redis_url)) = (&config.database_url, &config.redis_url) else {
        anyhow::bail!("persistent stores need DATABASE_URL and REDIS_URL");
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to postgres")?;
    let store = PostgresResultStore::new(pool)?;
    store.ensure_schema().await?;

    let broker = Arc::new(RedisBroker::new(redis_url)?.with_claim_lease(config.engine.claim_lease));

    if config.role.runs_workers() {
        let lanes = config.engine.worker_lanes.clone();
        let recovering = broker.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            for lane in lanes {
                recovering.recover_in_flight(lane)?;
            }
            Ok(())
        })
        .await??;
    }

    tracing::info!("using redis broker and postgres result store");
    Ok(AppServices::new(broker, Arc::new(store), registry))
}
