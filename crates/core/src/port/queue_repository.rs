// Queue Repository Port (Interface)

use crate::domain::{Queue, QueueId, QueueName};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for queue metadata
///
/// Lookups report absence as `Ok(None)` / `Ok(false)`, never as an error.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert or update by id. A name already used by another queue is `AppError::Conflict`.
    async fn save(&self, queue: &Queue) -> Result<()>;

    async fn find_by_id(&self, id: &QueueId) -> Result<Option<Queue>>;

    async fn find_by_name(&self, name: &QueueName) -> Result<Option<Queue>>;

    /// All queues ordered by name
    async fn list_all(&self) -> Result<Vec<Queue>>;

    /// Delete the queue and every job it owns. Returns false when nothing was deleted.
    async fn delete(&self, id: &QueueId) -> Result<bool>;
}
