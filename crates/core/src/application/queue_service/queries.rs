// Read-side queries and retention

use super::QueueService;
use crate::domain::{Job, JobStatus};
use crate::error::{AppError, Result};
use std::collections::HashMap;
use tracing::info;

impl QueueService {
    /// Page through this queue's jobs with `status`, in dispatch order
    pub async fn get_jobs_by_status(
        &self,
        status: JobStatus,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<Job>> {
        self.deps
            .jobs
            .find_by_status(&self.queue, status, offset, limit)
            .await
    }

    /// Counts for every status (zero-filled)
    pub async fn count_jobs_by_status(&self) -> Result<HashMap<JobStatus, i64>> {
        self.deps.jobs.count_by_status(&self.queue).await
    }

    /// Delete up to `limit` terminal jobs that finished more than `grace_ms` ago
    pub async fn clean(&self, status: JobStatus, grace_ms: i64, limit: u32) -> Result<u64> {
        if !status.is_terminal() {
            return Err(AppError::Validation(format!(
                "only terminal jobs can be cleaned, got '{}'",
                status
            )));
        }
        if grace_ms < 0 {
            return Err(AppError::Validation("grace period cannot be negative".into()));
        }
        let cutoff = self.now() - grace_ms;
        let deleted = self
            .deps
            .jobs
            .delete_finished(&self.queue, status, cutoff, limit)
            .await?;
        if deleted > 0 {
            info!(queue = %self.queue, status = %status, deleted, "Cleaned finished jobs");
        }
        Ok(deleted)
    }
}
