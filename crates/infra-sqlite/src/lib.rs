// Conveyor Infrastructure - SQLite Adapter
// Implements: QueueRepository, JobRepository

mod connection;
mod error;
mod job_repository;
mod migration;
mod queue_repository;

pub use connection::{create_pool, database_url};
pub use job_repository::SqliteJobRepository;
pub use migration::{current_version, run_migrations};
pub use queue_repository::SqliteQueueRepository;

use conveyor_core::error::Result;
use sqlx::SqlitePool;

/// Open (creating if needed) and migrate a database
pub async fn open_database(database_url: &str) -> Result<SqlitePool> {
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
