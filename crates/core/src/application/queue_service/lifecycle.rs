// Lifecycle Use Cases - load, transition, optimistic save, emit

use super::QueueService;
use crate::domain::{
    DomainError, EventPayload, Job, JobId, JobLogEntry, JobStatus, QueueEvent,
};
use crate::error::{AppError, Result};
use tracing::{debug, info, warn};

impl QueueService {
    /// Load a job of this queue or fail with `NotFound`
    pub(super) async fn load(&self, id: &JobId) -> Result<Job> {
        self.deps
            .jobs
            .find_by_id(&self.queue, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {} in queue '{}'", id, self.queue)))
    }

    /// Apply `transition` to the stored job and save it with a revision check.
    /// A lost race reloads and re-applies; once retries run out the result is `Conflict`.
    pub(super) async fn transition<F>(&self, id: &JobId, transition: F) -> Result<Job>
    where
        F: Fn(&Job, i64) -> std::result::Result<Job, DomainError>,
    {
        self.transition_as(id, None, transition).await
    }

    /// `transition`, refused with `Conflict` when `claim` is given and the stored job
    /// no longer carries that claim (reclaimed by a sweep and claimed again meanwhile)
    async fn transition_as<F>(
        &self,
        id: &JobId,
        claim: Option<&Job>,
        transition: F,
    ) -> Result<Job>
    where
        F: Fn(&Job, i64) -> std::result::Result<Job, DomainError>,
    {
        for round in 0..=self.config.cas_retries {
            let current = self.load(id).await?;
            if let Some(claimed) = claim {
                if !holds_claim(&current, claimed) {
                    return Err(AppError::Conflict(format!(
                        "claim on job {} (started at {:?}) is no longer held",
                        id,
                        claimed.started_at()
                    )));
                }
            }
            let next = transition(&current, self.now())?;
            if self.deps.jobs.update(&next).await? {
                return Ok(next.with_next_revision());
            }
            debug!(job_id = %id, round, "Optimistic write lost, reloading");
        }
        Err(AppError::Conflict(format!(
            "job {} was modified concurrently",
            id
        )))
    }

    /// Claim a specific job, honoring the queue's concurrency
    pub async fn mark_active(&self, id: &JobId) -> Result<Job> {
        let queue = self.current_queue().await?;
        let counts = self.deps.jobs.count_by_status(&self.queue).await?;
        let active = counts.get(&JobStatus::Active).copied().unwrap_or(0);
        if active >= i64::from(queue.concurrency().value()) {
            return Err(AppError::Conflict(format!(
                "queue '{}' is at capacity ({})",
                self.queue,
                queue.concurrency().value()
            )));
        }

        let lock = self.config.lock_duration_ms;
        let job = self
            .transition(id, |job, now| job.mark_active(now, lock))
            .await?;
        info!(job_id = %id, queue = %self.queue, "Job active");
        self.emit(QueueEvent::for_job(&job, EventPayload::Active { job: job.clone() }));
        Ok(job)
    }

    pub async fn mark_completed(
        &self,
        id: &JobId,
        result: Option<serde_json::Value>,
    ) -> Result<Job> {
        self.complete(id, None, result).await
    }

    /// Complete a job on behalf of the claim that produced `claimed`
    pub async fn complete_claim(
        &self,
        claimed: &Job,
        result: Option<serde_json::Value>,
    ) -> Result<Job> {
        self.complete(claimed.id(), Some(claimed), result).await
    }

    /// Record a failed attempt. The returned job is `pending`/`delayed` when it will retry.
    pub async fn mark_failed(&self, id: &JobId, error: impl Into<String>) -> Result<Job> {
        self.fail(id, None, error.into()).await
    }

    /// Fail an attempt on behalf of the claim that produced `claimed`
    pub async fn fail_claim(&self, claimed: &Job, error: impl Into<String>) -> Result<Job> {
        self.fail(claimed.id(), Some(claimed), error.into()).await
    }

    async fn complete(
        &self,
        id: &JobId,
        claim: Option<&Job>,
        result: Option<serde_json::Value>,
    ) -> Result<Job> {
        let job = self
            .transition_as(id, claim, |job, now| job.mark_completed(result.clone(), now))
            .await?;
        info!(job_id = %id, queue = %self.queue, "Job completed");
        self.emit(QueueEvent::for_job(
            &job,
            EventPayload::Completed {
                job: job.clone(),
                result,
            },
        ));
        Ok(job)
    }

    async fn fail(&self, id: &JobId, claim: Option<&Job>, error: String) -> Result<Job> {
        let job = self
            .transition_as(id, claim, |job, now| job.mark_failed(error.clone(), now))
            .await?;

        let will_retry = job.status() != JobStatus::Failed;
        if will_retry {
            warn!(
                job_id = %id,
                attempt = job.attempts_made(),
                max_attempts = job.opts().attempts,
                error = %error,
                "Job attempt failed, retrying"
            );
        } else {
            warn!(job_id = %id, attempts = job.attempts_made(), error = %error, "Job failed");
        }

        self.emit(QueueEvent::for_job(
            &job,
            EventPayload::Failed {
                job: job.clone(),
                error,
                will_retry,
            },
        ));
        self.emit_delayed_if_scheduled(&job);
        Ok(job)
    }

    pub async fn update_progress(&self, id: &JobId, progress: serde_json::Value) -> Result<Job> {
        let job = self
            .transition(id, |job, now| job.update_progress(progress.clone(), now))
            .await?;
        self.emit(QueueEvent::for_job(&job, EventPayload::Progress { progress }));
        Ok(job)
    }

    pub async fn append_log(&self, id: &JobId, message: impl Into<String>) -> Result<Job> {
        let message = message.into();
        let job = self
            .transition(id, |job, now| job.append_log(message.clone(), now))
            .await?;
        if let Some(entry) = job.execution_logs().last() {
            let entry: JobLogEntry = entry.clone();
            self.emit(QueueEvent::for_job(&job, EventPayload::LogAdded { entry }));
        }
        Ok(job)
    }

    /// Heartbeat for an active job
    pub async fn renew_lock(&self, id: &JobId) -> Result<Job> {
        let lock = self.config.lock_duration_ms;
        self.transition(id, |job, now| job.renew_lock(now, lock))
            .await
    }

    /// Heartbeat that only extends the lock while `claimed`'s claim is still held
    pub async fn renew_claim(&self, claimed: &Job) -> Result<Job> {
        let lock = self.config.lock_duration_ms;
        self.transition_as(claimed.id(), Some(claimed), |job, now| job.renew_lock(now, lock))
            .await
    }

    /// Administrative removal. Removing a terminal job leaves it unchanged.
    pub async fn remove(&self, id: &JobId) -> Result<Job> {
        let current = self.load(id).await?;
        if current.status().is_terminal() {
            return Ok(current);
        }
        let job = self.transition(id, |job, now| Ok(job.remove(now))).await?;
        info!(job_id = %id, queue = %self.queue, "Job removed");
        self.emit(QueueEvent::for_job(&job, EventPayload::Removed { job: job.clone() }));
        Ok(job)
    }

    pub(super) fn emit_delayed_if_scheduled(&self, job: &Job) {
        if job.status() != JobStatus::Delayed {
            return;
        }
        if let Some(delayed_until) = job.delayed_until() {
            self.emit(QueueEvent::for_job(job, EventPayload::Delayed { delayed_until }));
        }
    }
}

/// A claim is identified by its start time and the attempt it runs as.
/// A stall sweep bumps the attempt count, so a later claim never matches an earlier one.
fn holds_claim(current: &Job, claimed: &Job) -> bool {
    current.status() == JobStatus::Active
        && current.started_at() == claimed.started_at()
        && current.attempts_made() == claimed.attempts_made()
}
