// Job Repository Port (Interface)

use crate::domain::{Job, JobId, JobStatus, QueueName};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Repository interface for Job persistence
///
/// Jobs are addressed by `(queue, id)`; a job id looked up under another queue is absent.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job's queue does not exist
    /// - `AppError::Conflict` if the id is already taken in that queue
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID within a queue
    async fn find_by_id(&self, queue: &QueueName, id: &JobId) -> Result<Option<Job>>;

    /// Optimistic write: succeeds only if the stored revision equals `job.revision()`.
    /// The stored revision becomes `job.revision() + 1`.
    ///
    /// Returns false when another writer got there first (or the job is gone).
    async fn update(&self, job: &Job) -> Result<bool>;

    /// Atomically claim up to `limit` eligible jobs, in dispatch order, without pushing the
    /// queue past its concurrency. Each claimed job is returned as it is now stored.
    async fn claim_next(
        &self,
        queue: &QueueName,
        limit: u32,
        now_millis: i64,
        lock_duration_ms: i64,
    ) -> Result<Vec<Job>>;

    /// Job counts per status; every status is present (zero when empty)
    async fn count_by_status(&self, queue: &QueueName) -> Result<HashMap<JobStatus, i64>>;

    /// Page through jobs with a given status, in dispatch order
    async fn find_by_status(
        &self,
        queue: &QueueName,
        status: JobStatus,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Job>>;

    /// Delayed jobs whose `delayed_until <= now`
    async fn find_due_delayed(
        &self,
        queue: &QueueName,
        now_millis: i64,
        limit: u32,
    ) -> Result<Vec<Job>>;

    /// Active jobs whose claim expired (`lock_expires_at < now`)
    async fn find_expired_locks(
        &self,
        queue: &QueueName,
        now_millis: i64,
        limit: u32,
    ) -> Result<Vec<Job>>;

    /// Delete up to `limit` jobs in a terminal `status` that finished before `finished_before`.
    /// Returns the number of deleted jobs.
    async fn delete_finished(
        &self,
        queue: &QueueName,
        status: JobStatus,
        finished_before: i64,
        limit: u32,
    ) -> Result<u64>;
}
