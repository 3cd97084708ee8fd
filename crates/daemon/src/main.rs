// Conveyor Daemon - Composition Root
// Opens the database, bootstraps the configured queues and keeps them swept

mod config;
mod logging;

use anyhow::{Context, Result};
use config::DaemonConfig;
use conveyor_core::application::{
    shutdown_channel, QueueRegistry, QueueService, QueueServiceConfig, ServiceDeps, Sweeper,
};
use conveyor_core::domain::{EventKind, EventPayload};
use conveyor_core::port::{InMemoryEventBus, SystemTimeProvider, UuidProvider};
use conveyor_infra_sqlite::{
    database_url, open_database, SqliteJobRepository, SqliteQueueRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = DaemonConfig::from_env().context("invalid configuration")?;
    let _log_guard = logging::init_logging(config.log_format, config.log_dir.as_deref())?;

    info!(version = conveyor_core::VERSION, "Conveyor starting");
    info!(db_path = %config.db_path.display(), "Using database");

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let pool = open_database(&database_url(&config.db_path)).await?;

    let deps = ServiceDeps {
        jobs: Arc::new(SqliteJobRepository::new(pool.clone())),
        queues: Arc::new(SqliteQueueRepository::new(pool.clone())),
        events: Arc::new(InMemoryEventBus::new()),
        ids: Arc::new(UuidProvider),
        clock: Arc::new(SystemTimeProvider),
    };
    let service_config = QueueServiceConfig {
        lock_duration_ms: config.lock_duration_ms,
        ..QueueServiceConfig::default()
    };

    let services = bootstrap_queues(&config, &deps, service_config).await?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let sweeper = Sweeper::new(services.clone())
        .with_interval(config.sweep_interval)
        .with_batch(config.sweep_batch);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx));

    info!(queues = services.len(), "Conveyor ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown_tx.shutdown();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, sweeper_handle).await {
        Ok(Ok(())) => info!("Sweeper stopped gracefully"),
        Ok(Err(e)) => warn!(error = %e, "Sweeper task ended abnormally"),
        Err(_) => warn!("Sweeper did not stop within timeout"),
    }

    for service in &services {
        service.close();
    }
    pool.close().await;
    info!("Conveyor stopped");
    Ok(())
}

/// Create missing queues, apply configured concurrency and open a service per queue
async fn bootstrap_queues(
    config: &DaemonConfig,
    deps: &ServiceDeps,
    service_config: QueueServiceConfig,
) -> Result<Vec<Arc<QueueService>>> {
    let registry = QueueRegistry::new(deps.clone());
    let mut services = Vec::with_capacity(config.queues.len());

    for wanted in &config.queues {
        let mut queue = registry
            .ensure_queue(&wanted.name, wanted.concurrency)
            .await
            .with_context(|| format!("cannot bootstrap queue '{}'", wanted.name))?;
        if i64::from(queue.concurrency().value()) != wanted.concurrency {
            queue = registry.set_concurrency(queue.id(), wanted.concurrency).await?;
        }

        let service = Arc::new(
            QueueService::open(queue.name().clone(), deps.clone(), service_config).await?,
        );
        watch_failures(&service);

        let counts = service.count_jobs_by_status().await?;
        let backlog: i64 = counts
            .iter()
            .filter(|(status, _)| !status.is_terminal())
            .map(|(_, n)| *n)
            .sum();
        info!(
            queue = %queue.name(),
            concurrency = queue.concurrency().value(),
            backlog,
            "Queue ready"
        );
        services.push(service);
    }
    Ok(services)
}

/// Surface sweep outcomes that otherwise only show up as events
fn watch_failures(service: &QueueService) {
    service.on(EventKind::Stalled, |event| {
        warn!(queue = %event.queue_name, job_id = ?event.job_id, "Job stalled");
    });
    service.on(EventKind::WorkerError, |event| {
        if let EventPayload::WorkerError { error } = &event.payload {
            warn!(
                queue = %event.queue_name,
                job_id = ?event.job_id,
                error = %error,
                "Worker error"
            );
        }
    });
}
