//! Shared fixtures: a throwaway on-disk database and service wiring
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use conveyor_core::application::{QueueRegistry, QueueService, QueueServiceConfig, ServiceDeps};
use conveyor_core::port::mocks::ManualClock;
use conveyor_core::port::{InMemoryEventBus, TimeProvider, UuidProvider};
use conveyor_infra_sqlite::{
    create_pool, database_url, open_database, SqliteJobRepository, SqliteQueueRepository,
};
use sqlx::SqlitePool;

pub const T0: i64 = 1_700_000_000_000;

/// A migrated SQLite file under the temp dir, removed by `cleanup`
pub struct TestDb {
    pub path: PathBuf,
    pub pool: SqlitePool,
}

impl TestDb {
    pub async fn new() -> Self {
        let path =
            std::env::temp_dir().join(format!("conveyor-it-{}.db", uuid::Uuid::new_v4()));
        let pool = open_database(&database_url(&path)).await.unwrap();
        Self { path, pool }
    }

    /// Independent pool on the same file, standing in for another process
    pub async fn other_process(&self) -> SqlitePool {
        create_pool(&database_url(&self.path)).await.unwrap()
    }

    pub async fn cleanup(self) {
        self.pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

/// Wire SQLite repositories, a fresh event bus and the given clock
pub fn deps(pool: &SqlitePool, clock: Arc<dyn TimeProvider>) -> ServiceDeps {
    ServiceDeps {
        jobs: Arc::new(SqliteJobRepository::new(pool.clone())),
        queues: Arc::new(SqliteQueueRepository::new(pool.clone())),
        events: Arc::new(InMemoryEventBus::new()),
        ids: Arc::new(UuidProvider),
        clock,
    }
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(T0))
}

/// Ensure the queue exists and open a service for it
pub async fn open_queue(deps: &ServiceDeps, name: &str, concurrency: i64) -> QueueService {
    let queue = QueueRegistry::new(deps.clone())
        .ensure_queue(name, concurrency)
        .await
        .unwrap();
    QueueService::open(queue.name().clone(), deps.clone(), QueueServiceConfig::default())
        .await
        .unwrap()
}
