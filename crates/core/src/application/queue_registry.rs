// Queue Registry - queue metadata use cases

use crate::application::queue_service::ServiceDeps;
use crate::domain::{
    Queue, QueueConcurrency, QueueDescription, QueueId, QueueName, QueueProps,
};
use crate::error::{AppError, Result};
use tracing::info;

/// Create, rename, resize and delete queues
pub struct QueueRegistry {
    deps: ServiceDeps,
}

impl QueueRegistry {
    pub fn new(deps: ServiceDeps) -> Self {
        Self { deps }
    }

    /// Register a new queue
    ///
    /// # Errors
    /// - `AppError::Domain` for an invalid name, concurrency or description
    /// - `AppError::Conflict` if the name is taken
    pub async fn create_queue(
        &self,
        name: &str,
        concurrency: i64,
        description: Option<&str>,
    ) -> Result<Queue> {
        let name = QueueName::new(name)?;
        let concurrency = QueueConcurrency::new(concurrency)?;
        let description = QueueDescription::new(description)?;

        if self.deps.queues.find_by_name(&name).await?.is_some() {
            return Err(AppError::Conflict(format!("queue '{}' already exists", name)));
        }

        let queue = Queue::create(QueueProps {
            id: QueueId::parse(self.deps.ids.generate_id())?,
            name,
            concurrency,
            description: Some(description),
            now_millis: self.deps.clock.now_millis(),
        });
        self.deps.queues.save(&queue).await?;

        info!(
            queue_id = %queue.id(),
            queue = %queue.name(),
            concurrency = queue.concurrency().value(),
            "Queue created"
        );
        Ok(queue)
    }

    /// Create the queue unless one with this name exists; existing queues are returned as-is
    pub async fn ensure_queue(&self, name: &str, concurrency: i64) -> Result<Queue> {
        let parsed = QueueName::new(name)?;
        if let Some(existing) = self.deps.queues.find_by_name(&parsed).await? {
            return Ok(existing);
        }
        self.create_queue(name, concurrency, None).await
    }

    /// Rename and/or re-describe. Jobs follow the queue through a rename.
    pub async fn update_details(
        &self,
        id: &QueueId,
        name: Option<&str>,
        description: Option<Option<&str>>,
    ) -> Result<Queue> {
        let current = self.require(id).await?;
        let name = name.map(QueueName::new).transpose()?;
        let description = description.map(QueueDescription::new).transpose()?;

        let next = current.update_details(name, description, self.deps.clock.now_millis());
        // Queue equality is by id, and the clock may not have moved since the last write
        if next.name() != current.name() || next.description() != current.description() {
            self.deps.queues.save(&next).await?;
            info!(queue_id = %id, queue = %next.name(), "Queue details updated");
        }
        Ok(next)
    }

    pub async fn set_concurrency(&self, id: &QueueId, concurrency: i64) -> Result<Queue> {
        let current = self.require(id).await?;
        let concurrency = QueueConcurrency::new(concurrency)?;
        let next = current.set_concurrency(concurrency, self.deps.clock.now_millis());
        if next.concurrency() != current.concurrency() {
            self.deps.queues.save(&next).await?;
            info!(
                queue_id = %id,
                concurrency = concurrency.value(),
                "Queue concurrency changed"
            );
        }
        Ok(next)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Queue>> {
        let name = QueueName::new(name)?;
        self.deps.queues.find_by_name(&name).await
    }

    pub async fn get(&self, id: &QueueId) -> Result<Option<Queue>> {
        self.deps.queues.find_by_id(id).await
    }

    pub async fn list(&self) -> Result<Vec<Queue>> {
        self.deps.queues.list_all().await
    }

    /// Delete a queue together with all of its jobs
    pub async fn delete(&self, id: &QueueId) -> Result<bool> {
        let deleted = self.deps.queues.delete(id).await?;
        if deleted {
            info!(queue_id = %id, "Queue deleted");
        }
        Ok(deleted)
    }

    async fn require(&self, id: &QueueId) -> Result<Queue> {
        self.deps
            .queues
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("queue {}", id)))
    }
}
