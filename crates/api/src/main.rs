use std::sync::Arc;

use anyhow::Context;

use printopt_api::app::{self, services};
use printopt_api::config::AppConfig;
use printopt_api::dev;
use printopt_infra::jobs::WorkerPool;
use printopt_infra::{tasks, Scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    printopt_observability::init();

    let config = AppConfig::from_env()?;
    tracing::info!(role = ?config.role, "starting printopt");

    let deps = dev::task_deps(&config);
    let registry = Arc::new(tasks::default_registry(&deps)?);
    let services = Arc::new(services::build_services(&config, registry.clone()).await?);

    let workers = if config.role.runs_workers() {
        Some(
            WorkerPool::start(
                services.broker.clone(),
                services.runner.clone(),
                &config.engine.worker_lanes,
                config.engine.workers_per_lane,
                config.engine.worker_config(),
            )
            .context("failed to start workers")?,
        )
    } else {
        None
    };

    let beat = if config.role.runs_beat() {
        let scheduler = Scheduler::new(
            services.broker.clone(),
            registry.clone(),
            tasks::default_schedule()?,
            chrono::Utc::now(),
        )?;
        Some(
            scheduler
                .spawn(config.engine.scheduler_tick)
                .context("failed to start scheduler")?,
        )
    } else {
        None
    };

    if config.role.runs_api() {
        let listener = tokio::net::TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.bind_addr))?;
        tracing::info!("listening on {}", listener.local_addr()?);

        axum::serve(listener, app::build_app(services.clone()))
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    tracing::info!("shutting down");
    if let Some(beat) = beat {
        tokio::task::spawn_blocking(move || beat.shutdown()).await?;
    }
    services.broker.close();
    if let Some(workers) = workers {
        tokio::task::spawn_blocking(move || workers.shutdown()).await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
