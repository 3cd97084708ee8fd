// Stall and delay sweeps for one queue

use super::QueueService;
use crate::domain::{EventPayload, JobStatus, QueueEvent};
use crate::error::Result;
use tracing::{debug, info, warn};

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub promoted: usize,
    pub stalled: usize,
    /// Stalled jobs whose attempt budget ran out
    pub failed: usize,
}

impl SweepStats {
    pub fn is_empty(&self) -> bool {
        self.promoted == 0 && self.stalled == 0
    }
}

impl QueueService {
    /// Move due delayed jobs to pending
    pub async fn promote_delayed(&self, batch: u32) -> Result<usize> {
        let now = self.now();
        let due = self
            .deps
            .jobs
            .find_due_delayed(&self.queue, now, batch)
            .await?;

        let mut promoted = 0;
        for job in due {
            let next = job.promote(now)?;
            if !self.deps.jobs.update(&next).await? {
                debug!(job_id = %job.id(), "Delayed job changed during sweep, skipping");
                continue;
            }
            let next = next.with_next_revision();
            promoted += 1;
            self.emit(QueueEvent::for_job(&next, EventPayload::Promoted { job: next.clone() }));
        }
        Ok(promoted)
    }

    /// Reclaim active jobs whose lock expired. Each reclaim counts as an attempt.
    pub async fn reclaim_stalled(&self, batch: u32) -> Result<(usize, usize)> {
        let now = self.now();
        let expired = self
            .deps
            .jobs
            .find_expired_locks(&self.queue, now, batch)
            .await?;

        let (mut stalled, mut failed) = (0, 0);
        for job in expired {
            let marked = job.mark_stalled(now)?;
            let next = marked.requeue_stalled(now)?;
            if !self.deps.jobs.update(&next).await? {
                // Worker resolved or renewed it meanwhile
                debug!(job_id = %job.id(), "Expired job changed during sweep, skipping");
                continue;
            }
            let next = next.with_next_revision();
            stalled += 1;
            warn!(
                job_id = %job.id(),
                queue = %self.queue,
                attempts = next.attempts_made(),
                next_status = %next.status(),
                "Job stalled"
            );

            self.emit(QueueEvent::for_job(&marked, EventPayload::Stalled { job: marked.clone() }));
            match next.status() {
                JobStatus::Failed => {
                    failed += 1;
                    self.emit(QueueEvent::for_job(
                        &next,
                        EventPayload::Failed {
                            job: next.clone(),
                            error: next.failed_reason().unwrap_or_default().to_string(),
                            will_retry: false,
                        },
                    ));
                }
                JobStatus::Delayed => self.emit_delayed_if_scheduled(&next),
                _ => {}
            }
        }
        Ok((stalled, failed))
    }

    /// One full maintenance pass: stall sweep first, then promote
    ///
    /// # Errors
    /// - `AppError::NotFound` once the queue was renamed or deleted under this service
    pub async fn sweep(&self, batch: u32) -> Result<SweepStats> {
        self.current_queue().await?;
        let (stalled, failed) = self.reclaim_stalled(batch).await?;
        let promoted = self.promote_delayed(batch).await?;
        let stats = SweepStats {
            promoted,
            stalled,
            failed,
        };
        if !stats.is_empty() {
            info!(
                queue = %self.queue,
                promoted,
                stalled,
                failed,
                "Sweep completed"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::application::constants::DEFAULT_LOCK_DURATION_MS;
    use crate::domain::{Backoff, EventKind, JobOptions, JobStatus};
    use serde_json::json;

    #[tokio::test]
    async fn test_promote_due_delayed() {
        let h = Harness::new();
        let svc = h.queue("agents", 5).await;
        let promoted = record(&svc, EventKind::Promoted);
        let job = svc
            .add("later", json!({}), JobOptions::default().with_delay_ms(1_000))
            .await
            .unwrap();

        assert_eq!(svc.promote_delayed(10).await.unwrap(), 0);
        h.clock.advance(1_000);
        assert_eq!(svc.promote_delayed(10).await.unwrap(), 1);

        let stored = svc.get_job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Pending);
        assert_eq!(promoted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stall_sweep_requeues_and_counts_attempt() {
        let h = Harness::new();
        let svc = h.queue("agents", 5).await;
        let stalled = record(&svc, EventKind::Stalled);
        let job = svc
            .add("slow", json!({}), JobOptions::default().with_attempts(2))
            .await
            .unwrap();
        svc.claim_next(1).await.unwrap();

        // still within the lock
        h.clock.advance(DEFAULT_LOCK_DURATION_MS);
        assert_eq!(svc.reclaim_stalled(10).await.unwrap(), (0, 0));

        h.clock.advance(1);
        assert_eq!(svc.reclaim_stalled(10).await.unwrap(), (1, 0));
        let stored = svc.get_job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Pending);
        assert_eq!(stored.attempts_made(), 1);
        assert_eq!(stalled.lock().unwrap().len(), 1);

        // second stall exhausts the budget
        svc.claim_next(1).await.unwrap();
        h.clock.advance(DEFAULT_LOCK_DURATION_MS + 1);
        assert_eq!(svc.reclaim_stalled(10).await.unwrap(), (1, 1));
        let stored = svc.get_job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Failed);
        assert_eq!(stored.attempts_made(), 2);
    }

    #[tokio::test]
    async fn test_renewed_lock_is_not_reclaimed() {
        let h = Harness::new();
        let svc = h.queue("agents", 5).await;
        let job = svc.add("slow", json!({}), JobOptions::default()).await.unwrap();
        svc.claim_next(1).await.unwrap();

        h.clock.advance(DEFAULT_LOCK_DURATION_MS - 1);
        svc.renew_lock(job.id()).await.unwrap();
        h.clock.advance(DEFAULT_LOCK_DURATION_MS - 1);
        assert_eq!(svc.reclaim_stalled(10).await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_sweep_stall_with_backoff_then_promote() {
        let h = Harness::new();
        let svc = h.queue("agents", 5).await;
        let opts = JobOptions::default()
            .with_attempts(3)
            .with_backoff(Backoff::Fixed { delay_ms: 500 });
        let job = svc.add("slow", json!({}), opts).await.unwrap();
        svc.claim_next(1).await.unwrap();

        h.clock.advance(DEFAULT_LOCK_DURATION_MS + 1);
        let stats = svc.sweep(10).await.unwrap();
        assert_eq!(stats.stalled, 1);
        assert_eq!(stats.promoted, 0);
        let stored = svc.get_job(job.id().as_str()).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Delayed);

        h.clock.advance(500);
        let stats = svc.sweep(10).await.unwrap();
        assert_eq!(stats.promoted, 1);
    }

    #[tokio::test]
    async fn test_sweep_fails_after_queue_renamed() {
        let h = Harness::new();
        let svc = h.queue("agents", 5).await;
        let errors = record(&svc, EventKind::WorkerError);
        svc.add("later", json!({}), JobOptions::default().with_delay_ms(10))
            .await
            .unwrap();

        let registry = crate::application::QueueRegistry::new(h.deps.clone());
        let queue = registry.get_by_name("agents").await.unwrap().unwrap();
        registry
            .update_details(queue.id(), Some("models"), None)
            .await
            .unwrap();

        h.clock.advance(10);
        assert!(matches!(
            svc.sweep(10).await,
            Err(crate::error::AppError::NotFound(_))
        ));
        let sweeper = crate::application::Sweeper::new(vec![std::sync::Arc::new(svc)]);
        assert!(sweeper.run_once().await.is_empty());
        assert_eq!(errors.lock().unwrap().len(), 1);

        let reopened = super::super::QueueService::open(
            crate::domain::QueueName::new("models").unwrap(),
            h.deps.clone(),
            super::super::QueueServiceConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(reopened.sweep(10).await.unwrap().promoted, 1);
    }
}
