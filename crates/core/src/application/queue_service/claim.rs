// Claim Use Case - atomic dequeue for workers

use super::QueueService;
use crate::domain::{EventPayload, Job, QueueEvent};
use crate::error::Result;
use tracing::debug;

impl QueueService {
    /// Claim up to `limit` jobs in dispatch order (priority DESC, oldest first).
    ///
    /// Never exceeds the queue's concurrency, never hands the same job to two callers.
    /// Empty when paused, when nothing is eligible, or when the queue is at capacity.
    pub async fn claim_next(&self, limit: u32) -> Result<Vec<Job>> {
        if limit == 0 || self.is_paused() {
            return Ok(vec![]);
        }

        let claimed = self
            .deps
            .jobs
            .claim_next(
                &self.queue,
                limit,
                self.now(),
                self.config.lock_duration_ms,
            )
            .await?;

        for job in &claimed {
            debug!(
                job_id = %job.id(),
                queue = %self.queue,
                priority = job.priority().value(),
                "Job claimed"
            );
            self.emit(QueueEvent::for_job(job, EventPayload::Active { job: job.clone() }));
        }
        Ok(claimed)
    }
}
