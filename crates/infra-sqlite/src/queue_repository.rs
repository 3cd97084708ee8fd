// SQLite QueueRepository Implementation

use crate::error::{corrupt_row, map_sqlx_error};
use async_trait::async_trait;
use conveyor_core::domain::{Queue, QueueConcurrency, QueueDescription, QueueId, QueueName};
use conveyor_core::error::Result;
use conveyor_core::port::QueueRepository;
use sqlx::SqlitePool;
use tracing::debug;

pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn save(&self, queue: &Queue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queues (id, name, concurrency, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                concurrency = excluded.concurrency,
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(queue.id().as_str())
        .bind(queue.name().as_str())
        .bind(i64::from(queue.concurrency().value()))
        .bind(queue.description().as_deref())
        .bind(queue.created_at())
        .bind(queue.updated_at())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(queue_id = %queue.id(), queue = %queue.name(), "Queue saved");
        Ok(())
    }

    async fn find_by_id(&self, id: &QueueId) -> Result<Option<Queue>> {
        let row = sqlx::query_as::<_, QueueRow>("SELECT * FROM queues WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(QueueRow::into_queue).transpose()
    }

    async fn find_by_name(&self, name: &QueueName) -> Result<Option<Queue>> {
        let row = sqlx::query_as::<_, QueueRow>("SELECT * FROM queues WHERE name = ?")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(QueueRow::into_queue).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Queue>> {
        let rows = sqlx::query_as::<_, QueueRow>("SELECT * FROM queues ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter().map(QueueRow::into_queue).collect()
    }

    async fn delete(&self, id: &QueueId) -> Result<bool> {
        // jobs go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM queues WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    name: String,
    concurrency: i64,
    description: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl QueueRow {
    fn into_queue(self) -> Result<Queue> {
        let id = QueueId::parse(self.id).map_err(|e| corrupt_row("queue", e))?;
        let name = QueueName::new(&self.name).map_err(|e| corrupt_row("queue", e))?;
        let concurrency =
            QueueConcurrency::new(self.concurrency).map_err(|e| corrupt_row("queue", e))?;
        let description = QueueDescription::new(self.description.as_deref())
            .map_err(|e| corrupt_row("queue", e))?;
        Ok(Queue::restore(
            id,
            name,
            concurrency,
            description,
            self.created_at,
            self.updated_at,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use conveyor_core::domain::QueueProps;
    use conveyor_core::error::AppError;

    async fn setup_test_db() -> SqliteQueueRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteQueueRepository::new(pool)
    }

    fn queue(name: &str, concurrency: i64, description: Option<&str>) -> Queue {
        Queue::create(QueueProps {
            id: QueueId::parse(uuid::Uuid::new_v4().to_string()).unwrap(),
            name: QueueName::new(name).unwrap(),
            concurrency: QueueConcurrency::new(concurrency).unwrap(),
            description: Some(QueueDescription::new(description).unwrap()),
            now_millis: 1_000,
        })
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let repo = setup_test_db().await;
        let q = queue("mail", 7, Some("outbound"));
        repo.save(&q).await.unwrap();

        let loaded = repo.find_by_id(q.id()).await.unwrap().unwrap();
        assert_eq!(loaded.id(), q.id());
        assert_eq!(loaded.name(), q.name());
        assert_eq!(loaded.concurrency(), q.concurrency());
        assert_eq!(loaded.description(), q.description());

        let by_name = repo.find_by_name(q.name()).await.unwrap().unwrap();
        assert_eq!(by_name, q);
    }

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let repo = setup_test_db().await;
        let q = queue("mail", 7, None);
        repo.save(&q).await.unwrap();

        let renamed = q.update_details(Some(QueueName::new("post").unwrap()), None, 2_000);
        repo.save(&renamed).await.unwrap();

        assert!(repo
            .find_by_name(&QueueName::new("mail").unwrap())
            .await
            .unwrap()
            .is_none());
        let loaded = repo.find_by_id(q.id()).await.unwrap().unwrap();
        assert_eq!(loaded.name().as_str(), "post");
        assert_eq!(loaded.updated_at(), 2_000);
        assert_eq!(loaded.created_at(), 1_000);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_conflict() {
        let repo = setup_test_db().await;
        repo.save(&queue("mail", 1, None)).await.unwrap();
        let err = repo.save(&queue("mail", 2, None)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let repo = setup_test_db().await;
        let b = queue("bravo", 1, None);
        let a = queue("alpha", 1, None);
        repo.save(&b).await.unwrap();
        repo.save(&a).await.unwrap();

        let names: Vec<String> = repo
            .list_all()
            .await
            .unwrap()
            .iter()
            .map(|q| q.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "bravo"]);

        assert!(repo.delete(a.id()).await.unwrap());
        assert!(!repo.delete(a.id()).await.unwrap());
        assert!(repo.find_by_id(a.id()).await.unwrap().is_none());
    }
}
