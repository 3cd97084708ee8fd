// SQLite JobRepository Implementation

use crate::error::{corrupt_row, map_sqlx_error};
use async_trait::async_trait;
use conveyor_core::domain::{
    Job, JobExecutionLogs, JobId, JobOptions, JobPriority, JobProgress, JobRecord, JobStatus,
    QueueName,
};
use conveyor_core::error::{AppError, Result};
use conveyor_core::port::JobRepository;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::debug;

/// Columns of `jobs` plus the owning queue's name
const SELECT_JOB: &str = r#"
    SELECT j.id, q.name AS queue_name, j.name, j.payload, j.opts, j.status, j.priority,
           j.progress, j.return_value, j.attempts_made, j.execution_logs,
           j.created_at, j.updated_at, j.started_at, j.finished_at, j.failed_reason,
           j.delayed_until, j.lock_expires_at, j.revision
    FROM jobs j
    JOIN queues q ON q.id = j.queue_id
"#;

/// Dispatch order, identical for claims and listings
const DISPATCH_ORDER: &str = "ORDER BY j.priority DESC, j.created_at ASC, j.rowid ASC";

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn queue_snapshot(&self, queue: &QueueName) -> Result<Option<(String, i64)>> {
        sqlx::query_as::<_, (String, i64)>("SELECT id, concurrency FROM queues WHERE name = ?")
            .bind(queue.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn active_count(&self, queue_id: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue_id = ? AND status = 'active'")
            .bind(queue_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    /// The conditional UPDATE that moves one job to `active`.
    /// Succeeds only if the row is untouched since it was read, still eligible, and the
    /// queue is below its concurrency at the moment of the write.
    async fn try_claim(
        &self,
        queue_id: &str,
        concurrency: i64,
        candidate: &Job,
        now_millis: i64,
        lock_duration_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'active', started_at = ?, lock_expires_at = ?,
                delayed_until = NULL, updated_at = ?, revision = revision + 1
            WHERE id = ? AND queue_id = ? AND revision = ?
              AND (status = 'pending' OR (status = 'delayed' AND delayed_until <= ?))
              AND (SELECT COUNT(*) FROM jobs WHERE queue_id = ? AND status = 'active') < ?
            "#,
        )
        .bind(now_millis)
        .bind(now_millis.saturating_add(lock_duration_ms))
        .bind(now_millis)
        .bind(candidate.id().as_str())
        .bind(queue_id)
        .bind(candidate.revision())
        .bind(now_millis)
        .bind(queue_id)
        .bind(concurrency)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter().map(JobRow::into_job).collect()
}

fn to_json_text<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn optional_json_text(value: Option<&serde_json::Value>) -> Result<Option<String>> {
    value.map(to_json_text).transpose()
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue_id, name, payload, opts, status, priority,
                progress, return_value, attempts_made, execution_logs,
                created_at, updated_at, started_at, finished_at, failed_reason,
                delayed_until, lock_expires_at, revision
            )
            SELECT ?, q.id, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            FROM queues q WHERE q.name = ?
            "#,
        )
        .bind(job.id().as_str())
        .bind(job.job_name())
        .bind(to_json_text(job.payload())?)
        .bind(to_json_text(job.opts())?)
        .bind(job.status().as_str())
        .bind(job.priority().value())
        .bind(optional_json_text(job.progress().as_value())?)
        .bind(optional_json_text(job.return_value())?)
        .bind(i64::from(job.attempts_made()))
        .bind(to_json_text(job.execution_logs())?)
        .bind(job.created_at())
        .bind(job.updated_at())
        .bind(job.started_at())
        .bind(job.finished_at())
        .bind(job.failed_reason())
        .bind(job.delayed_until())
        .bind(job.lock_expires_at())
        .bind(job.revision())
        .bind(job.queue_name().as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("queue '{}'", job.queue_name())));
        }
        Ok(())
    }

    async fn find_by_id(&self, queue: &QueueName, id: &JobId) -> Result<Option<Job>> {
        let sql = format!("{SELECT_JOB} WHERE q.name = ? AND j.id = ?");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(queue.as_str())
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(JobRow::into_job).transpose()
    }

    async fn update(&self, job: &Job) -> Result<bool> {
        // Conditional on the revision we read: a concurrent writer makes this a no-op
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, priority = ?, progress = ?, return_value = ?,
                attempts_made = ?, execution_logs = ?, updated_at = ?,
                started_at = ?, finished_at = ?, failed_reason = ?,
                delayed_until = ?, lock_expires_at = ?,
                revision = revision + 1
            WHERE id = ?
              AND queue_id = (SELECT id FROM queues WHERE name = ?)
              AND revision = ?
            "#,
        )
        .bind(job.status().as_str())
        .bind(job.priority().value())
        .bind(optional_json_text(job.progress().as_value())?)
        .bind(optional_json_text(job.return_value())?)
        .bind(i64::from(job.attempts_made()))
        .bind(to_json_text(job.execution_logs())?)
        .bind(job.updated_at())
        .bind(job.started_at())
        .bind(job.finished_at())
        .bind(job.failed_reason())
        .bind(job.delayed_until())
        .bind(job.lock_expires_at())
        .bind(job.id().as_str())
        .bind(job.queue_name().as_str())
        .bind(job.revision())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim_next(
        &self,
        queue: &QueueName,
        limit: u32,
        now_millis: i64,
        lock_duration_ms: i64,
    ) -> Result<Vec<Job>> {
        let Some((queue_id, concurrency)) = self.queue_snapshot(queue).await? else {
            return Ok(vec![]);
        };

        let active = self.active_count(&queue_id).await?;
        let capacity = (concurrency - active).max(0).min(i64::from(limit));

        let sql = format!(
            "{SELECT_JOB} WHERE q.name = ? \
             AND (j.status = 'pending' OR (j.status = 'delayed' AND j.delayed_until <= ?)) \
             {DISPATCH_ORDER} LIMIT ?"
        );

        let mut claimed: Vec<Job> = Vec::new();
        // Candidates lost to other workers are gone from the eligible set on the next read,
        // so every extra round means someone else made progress.
        while (claimed.len() as i64) < capacity {
            let wanted = capacity - claimed.len() as i64;
            let rows = sqlx::query_as::<_, JobRow>(&sql)
                .bind(queue.as_str())
                .bind(now_millis)
                .bind(wanted)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if rows.is_empty() {
                break;
            }

            let mut lost = 0;
            for candidate in into_jobs(rows)? {
                if self
                    .try_claim(&queue_id, concurrency, &candidate, now_millis, lock_duration_ms)
                    .await?
                {
                    claimed.push(
                        candidate
                            .mark_active(now_millis, lock_duration_ms)?
                            .with_next_revision(),
                    );
                } else {
                    debug!(job_id = %candidate.id(), "Claim lost to another worker, skipping");
                    lost += 1;
                }
            }

            if lost == 0 || self.active_count(&queue_id).await? >= concurrency {
                break;
            }
        }
        Ok(claimed)
    }

    async fn count_by_status(&self, queue: &QueueName) -> Result<HashMap<JobStatus, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT j.status, COUNT(*)
            FROM jobs j JOIN queues q ON q.id = j.queue_id
            WHERE q.name = ?
            GROUP BY j.status
            "#,
        )
        .bind(queue.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut counts: HashMap<JobStatus, i64> =
            JobStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for (status, count) in rows {
            let status = status
                .parse::<JobStatus>()
                .map_err(|e| corrupt_row("job", e))?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    async fn find_by_status(
        &self,
        queue: &QueueName,
        status: JobStatus,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let sql = format!(
            "{SELECT_JOB} WHERE q.name = ? AND j.status = ? {DISPATCH_ORDER} LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(queue.as_str())
            .bind(status.as_str())
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        into_jobs(rows)
    }

    async fn find_due_delayed(
        &self,
        queue: &QueueName,
        now_millis: i64,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let sql = format!(
            "{SELECT_JOB} WHERE q.name = ? AND j.status = 'delayed' AND j.delayed_until <= ? \
             ORDER BY j.delayed_until ASC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(queue.as_str())
            .bind(now_millis)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        into_jobs(rows)
    }

    async fn find_expired_locks(
        &self,
        queue: &QueueName,
        now_millis: i64,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let sql = format!(
            "{SELECT_JOB} WHERE q.name = ? AND j.status = 'active' AND j.lock_expires_at < ? \
             ORDER BY j.lock_expires_at ASC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(queue.as_str())
            .bind(now_millis)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        into_jobs(rows)
    }

    async fn delete_finished(
        &self,
        queue: &QueueName,
        status: JobStatus,
        finished_before: i64,
        limit: u32,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs WHERE rowid IN (
                SELECT j.rowid FROM jobs j JOIN queues q ON q.id = j.queue_id
                WHERE q.name = ? AND j.status = ? AND j.finished_at < ?
                ORDER BY j.finished_at ASC
                LIMIT ?
            )
            "#,
        )
        .bind(queue.as_str())
        .bind(status.as_str())
        .bind(finished_before)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue_name: String,
    name: String,
    payload: String,
    opts: String,
    status: String,
    priority: i64,
    progress: Option<String>,
    return_value: Option<String>,
    attempts_made: i64,
    execution_logs: String,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    failed_reason: Option<String>,
    delayed_until: Option<i64>,
    lock_expires_at: Option<i64>,
    revision: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let bad = |e: &dyn std::fmt::Display| corrupt_row("job", format!("{} ({})", e, self.id));

        let id = JobId::parse(&self.id).map_err(|e| bad(&e))?;
        let queue_name = QueueName::new(&self.queue_name).map_err(|e| bad(&e))?;
        let status = self.status.parse::<JobStatus>().map_err(|e| bad(&e))?;
        let priority = JobPriority::new(self.priority).map_err(|e| bad(&e))?;
        let attempts_made = u32::try_from(self.attempts_made).map_err(|e| bad(&e))?;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let opts: JobOptions = serde_json::from_str(&self.opts)?;
        let progress = match self.progress.as_deref() {
            Some(text) => JobProgress::new(serde_json::from_str(text)?),
            None => JobProgress::default(),
        };
        let return_value = self
            .return_value
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let execution_logs: JobExecutionLogs = serde_json::from_str(&self.execution_logs)?;

        Ok(Job::restore(JobRecord {
            id,
            queue_name,
            job_name: self.name,
            payload,
            opts,
            status,
            priority,
            progress,
            return_value,
            attempts_made,
            execution_logs,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            failed_reason: self.failed_reason,
            delayed_until: self.delayed_until,
            lock_expires_at: self.lock_expires_at,
            revision: self.revision,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations, SqliteQueueRepository};
    use conveyor_core::domain::{
        JobProps, Queue, QueueConcurrency, QueueDescription, QueueId, QueueProps,
    };
    use conveyor_core::port::QueueRepository;
    use serde_json::json;

    const NOW: i64 = 1_000_000;
    const LOCK_MS: i64 = 30_000;

    async fn setup_test_db(concurrency: i64) -> (SqliteJobRepository, QueueName) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let queue = Queue::create(QueueProps {
            id: QueueId::parse(uuid::Uuid::new_v4().to_string()).unwrap(),
            name: QueueName::new("agents").unwrap(),
            concurrency: QueueConcurrency::new(concurrency).unwrap(),
            description: Some(QueueDescription::none()),
            now_millis: NOW,
        });
        SqliteQueueRepository::new(pool.clone())
            .save(&queue)
            .await
            .unwrap();
        (SqliteJobRepository::new(pool), queue.name().clone())
    }

    fn new_job(queue: &QueueName, opts: JobOptions, created_at: i64) -> Job {
        Job::create(JobProps {
            id: JobId::parse(uuid::Uuid::new_v4().to_string()).unwrap(),
            queue_name: queue.clone(),
            job_name: "invoke".into(),
            payload: json!({"prompt": "hi", "n": [1, 2]}),
            opts,
            now_millis: created_at,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (repo, queue) = setup_test_db(5).await;
        let job = new_job(&queue, JobOptions::default().with_priority(7), NOW);
        repo.insert(&job).await.unwrap();

        let found = repo.find_by_id(&queue, job.id()).await.unwrap().unwrap();
        assert_eq!(found, job);

        let other = QueueName::new("other").unwrap();
        assert!(repo.find_by_id(&other, job.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_unknown_queue_and_duplicate() {
        let (repo, queue) = setup_test_db(5).await;
        let orphan = new_job(&QueueName::new("nowhere").unwrap(), JobOptions::default(), NOW);
        assert!(matches!(repo.insert(&orphan).await, Err(AppError::NotFound(_))));

        let job = new_job(&queue, JobOptions::default(), NOW);
        repo.insert(&job).await.unwrap();
        assert!(matches!(repo.insert(&job).await, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_is_revision_checked() {
        let (repo, queue) = setup_test_db(5).await;
        let job = new_job(&queue, JobOptions::default(), NOW);
        repo.insert(&job).await.unwrap();

        let logged = job.append_log("hello", NOW + 1).unwrap();
        assert!(repo.update(&logged).await.unwrap());
        // same base revision again: lost race
        assert!(!repo.update(&logged).await.unwrap());

        let stored = repo.find_by_id(&queue, job.id()).await.unwrap().unwrap();
        assert_eq!(stored.revision(), 1);
        assert_eq!(stored.execution_logs().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_priority_then_fifo() {
        let (repo, queue) = setup_test_db(10).await;
        for (i, p) in [5, 1, 10, 2].into_iter().enumerate() {
            let job = new_job(&queue, JobOptions::default().with_priority(p), NOW + i as i64);
            repo.insert(&job).await.unwrap();
        }
        let claimed = repo.claim_next(&queue, 10, NOW + 10, LOCK_MS).await.unwrap();
        let order: Vec<i64> = claimed.iter().map(|j| j.priority().value()).collect();
        assert_eq!(order, vec![10, 5, 2, 1]);

        let stored = repo
            .find_by_id(&queue, claimed[0].id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, claimed[0]);
        assert_eq!(stored.lock_expires_at(), Some(NOW + 10 + LOCK_MS));
    }

    #[tokio::test]
    async fn test_claim_same_timestamp_uses_insertion_order() {
        let (repo, queue) = setup_test_db(10).await;
        let a = new_job(&queue, JobOptions::default(), NOW);
        let b = new_job(&queue, JobOptions::default(), NOW);
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        let first = repo.claim_next(&queue, 1, NOW, LOCK_MS).await.unwrap();
        assert_eq!(first[0].id(), a.id());
    }

    #[tokio::test]
    async fn test_claim_respects_capacity_and_delay() {
        let (repo, queue) = setup_test_db(2).await;
        for _ in 0..4 {
            repo.insert(&new_job(&queue, JobOptions::default(), NOW))
                .await
                .unwrap();
        }
        repo.insert(&new_job(&queue, JobOptions::default().with_delay_ms(100), NOW))
            .await
            .unwrap();

        assert_eq!(repo.claim_next(&queue, 10, NOW, LOCK_MS).await.unwrap().len(), 2);
        assert!(repo.claim_next(&queue, 10, NOW, LOCK_MS).await.unwrap().is_empty());

        let counts = repo.count_by_status(&queue).await.unwrap();
        assert_eq!(counts[&JobStatus::Active], 2);
        assert_eq!(counts[&JobStatus::Pending], 2);
        assert_eq!(counts[&JobStatus::Delayed], 1);
        assert_eq!(counts[&JobStatus::Removed], 0);
    }

    #[tokio::test]
    async fn test_claim_empty_or_only_future_delayed() {
        let (repo, queue) = setup_test_db(5).await;
        assert!(repo.claim_next(&queue, 5, NOW, LOCK_MS).await.unwrap().is_empty());

        let later = new_job(&queue, JobOptions::default().with_delay_ms(1_000), NOW);
        repo.insert(&later).await.unwrap();
        assert!(repo.claim_next(&queue, 5, NOW + 999, LOCK_MS).await.unwrap().is_empty());

        let claimed = repo.claim_next(&queue, 5, NOW + 1_000, LOCK_MS).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].delayed_until(), None);
    }

    #[tokio::test]
    async fn test_sweep_queries() {
        let (repo, queue) = setup_test_db(5).await;
        repo.insert(&new_job(&queue, JobOptions::default().with_delay_ms(50), NOW))
            .await
            .unwrap();
        repo.insert(&new_job(&queue, JobOptions::default(), NOW))
            .await
            .unwrap();
        repo.claim_next(&queue, 1, NOW, LOCK_MS).await.unwrap();

        assert_eq!(repo.find_due_delayed(&queue, NOW + 49, 10).await.unwrap().len(), 0);
        assert_eq!(repo.find_due_delayed(&queue, NOW + 50, 10).await.unwrap().len(), 1);
        assert_eq!(
            repo.find_expired_locks(&queue, NOW + LOCK_MS, 10).await.unwrap().len(),
            0
        );
        assert_eq!(
            repo.find_expired_locks(&queue, NOW + LOCK_MS + 1, 10).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_find_by_status_pages_and_delete_finished() {
        let (repo, queue) = setup_test_db(5).await;
        for p in [1, 9, 4] {
            repo.insert(&new_job(&queue, JobOptions::default().with_priority(p), NOW))
                .await
                .unwrap();
        }
        let page = repo
            .find_by_status(&queue, JobStatus::Pending, 1, 1)
            .await
            .unwrap();
        assert_eq!(page[0].priority().value(), 4);

        let claimed = repo.claim_next(&queue, 1, NOW, LOCK_MS).await.unwrap();
        let done = claimed[0].mark_completed(Some(json!({"ok": true})), NOW + 5).unwrap();
        assert!(repo.update(&done).await.unwrap());

        let stored = repo.find_by_id(&queue, done.id()).await.unwrap().unwrap();
        assert_eq!(stored.return_value(), Some(&json!({"ok": true})));

        assert_eq!(
            repo.delete_finished(&queue, JobStatus::Completed, NOW + 5, 10)
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            repo.delete_finished(&queue, JobStatus::Completed, NOW + 6, 10)
                .await
                .unwrap(),
            1
        );
    }
}
