// In-memory adapters for use-case tests

use super::{IdProvider, JobRepository, QueueRepository, TimeProvider};
use crate::domain::{Job, JobId, JobStatus, Queue, QueueId, QueueName};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Clock that only moves when told to
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeProvider for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Deterministic, UUID-shaped ids: ...-000000000001, ...-000000000002, ...
#[derive(Default)]
pub struct SequentialIdProvider {
    counter: AtomicU64,
}

impl IdProvider for SequentialIdProvider {
    fn generate_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("00000000-0000-4000-8000-{:012x}", n)
    }
}

struct StoredJob {
    queue_id: QueueId,
    /// Insertion sequence, last dispatch tie-breaker
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct StoreState {
    queues: HashMap<QueueId, Queue>,
    jobs: Vec<StoredJob>,
    next_seq: u64,
}

impl StoreState {
    fn queue_by_name(&self, name: &QueueName) -> Option<&Queue> {
        self.queues.values().find(|q| q.name() == name)
    }

    /// Jobs carry the queue name; re-stamp it in case the queue was renamed
    fn present(queue: &Queue, job: &Job) -> Job {
        if job.queue_name() == queue.name() {
            return job.clone();
        }
        let mut record = job.clone().into_record();
        record.queue_name = queue.name().clone();
        Job::restore(record)
    }

    fn sorted_in(&self, queue: &Queue, keep: impl Fn(&Job) -> bool) -> Vec<&StoredJob> {
        let mut jobs: Vec<&StoredJob> = self
            .jobs
            .iter()
            .filter(|s| s.queue_id == *queue.id() && keep(&s.job))
            .collect();
        jobs.sort_by(|a, b| a.job.dispatch_cmp(&b.job).then(a.seq.cmp(&b.seq)));
        jobs
    }
}

/// Single store implementing both repositories, mirroring one shared database
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn job_count(&self) -> usize {
        self.lock().jobs.len()
    }
}

#[async_trait]
impl QueueRepository for InMemoryStore {
    async fn save(&self, queue: &Queue) -> Result<()> {
        let mut state = self.lock();
        if let Some(other) = state.queue_by_name(queue.name()) {
            if other.id() != queue.id() {
                return Err(AppError::Conflict(format!(
                    "queue name '{}' already in use",
                    queue.name()
                )));
            }
        }
        state.queues.insert(queue.id().clone(), queue.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &QueueId) -> Result<Option<Queue>> {
        Ok(self.lock().queues.get(id).cloned())
    }

    async fn find_by_name(&self, name: &QueueName) -> Result<Option<Queue>> {
        Ok(self.lock().queue_by_name(name).cloned())
    }

    async fn list_all(&self) -> Result<Vec<Queue>> {
        let mut queues: Vec<Queue> = self.lock().queues.values().cloned().collect();
        queues.sort_by(|a, b| a.name().as_str().cmp(b.name().as_str()));
        Ok(queues)
    }

    async fn delete(&self, id: &QueueId) -> Result<bool> {
        let mut state = self.lock();
        if state.queues.remove(id).is_none() {
            return Ok(false);
        }
        state.jobs.retain(|s| s.queue_id != *id);
        Ok(true)
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let mut state = self.lock();
        let queue_id = state
            .queue_by_name(job.queue_name())
            .map(|q| q.id().clone())
            .ok_or_else(|| AppError::NotFound(format!("queue '{}'", job.queue_name())))?;
        if state
            .jobs
            .iter()
            .any(|s| s.queue_id == queue_id && s.job.id() == job.id())
        {
            return Err(AppError::Conflict(format!("job {} already exists", job.id())));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.push(StoredJob {
            queue_id,
            seq,
            job: job.clone(),
        });
        Ok(())
    }

    async fn find_by_id(&self, queue: &QueueName, id: &JobId) -> Result<Option<Job>> {
        let state = self.lock();
        let Some(q) = state.queue_by_name(queue) else {
            return Ok(None);
        };
        Ok(state
            .jobs
            .iter()
            .find(|s| s.queue_id == *q.id() && s.job.id() == id)
            .map(|s| StoreState::present(q, &s.job)))
    }

    async fn update(&self, job: &Job) -> Result<bool> {
        let mut state = self.lock();
        let Some(queue_id) = state.queue_by_name(job.queue_name()).map(|q| q.id().clone()) else {
            return Ok(false);
        };
        let Some(stored) = state
            .jobs
            .iter_mut()
            .find(|s| s.queue_id == queue_id && s.job.id() == job.id())
        else {
            return Ok(false);
        };
        if stored.job.revision() != job.revision() {
            return Ok(false);
        }
        stored.job = job.with_next_revision();
        Ok(true)
    }

    async fn claim_next(
        &self,
        queue: &QueueName,
        limit: u32,
        now_millis: i64,
        lock_duration_ms: i64,
    ) -> Result<Vec<Job>> {
        let mut state = self.lock();
        let Some(q) = state.queue_by_name(queue).cloned() else {
            return Ok(vec![]);
        };
        let active = state
            .jobs
            .iter()
            .filter(|s| s.queue_id == *q.id() && s.job.status() == JobStatus::Active)
            .count() as u32;
        let capacity = q.concurrency().value().saturating_sub(active);
        let take = limit.min(capacity) as usize;
        if take == 0 {
            return Ok(vec![]);
        }

        let picked: Vec<u64> = state
            .sorted_in(&q, |j| j.is_claimable(now_millis))
            .into_iter()
            .take(take)
            .map(|s| s.seq)
            .collect();

        let mut claimed = Vec::with_capacity(picked.len());
        for seq in picked {
            if let Some(stored) = state.jobs.iter_mut().find(|s| s.seq == seq) {
                let next = stored
                    .job
                    .mark_active(now_millis, lock_duration_ms)?
                    .with_next_revision();
                stored.job = next.clone();
                claimed.push(StoreState::present(&q, &next));
            }
        }
        Ok(claimed)
    }

    async fn count_by_status(&self, queue: &QueueName) -> Result<HashMap<JobStatus, i64>> {
        let state = self.lock();
        let mut counts: HashMap<JobStatus, i64> =
            JobStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        if let Some(q) = state.queue_by_name(queue) {
            for stored in state.jobs.iter().filter(|s| s.queue_id == *q.id()) {
                *counts.entry(stored.job.status()).or_insert(0) += 1;
            }
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
        let state = self.lock();
        let Some(q) = state.queue_by_name(queue) else {
            return Ok(vec![]);
        };
        Ok(state
            .sorted_in(q, |j| j.status() == status)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|s| StoreState::present(q, &s.job))
            .collect())
    }

    async fn find_due_delayed(
        &self,
        queue: &QueueName,
        now_millis: i64,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let state = self.lock();
        let Some(q) = state.queue_by_name(queue) else {
            return Ok(vec![]);
        };
        let mut due: Vec<Job> = state
            .jobs
            .iter()
            .filter(|s| {
                s.queue_id == *q.id()
                    && s.job.status() == JobStatus::Delayed
                    && s.job.is_due(now_millis)
            })
            .map(|s| StoreState::present(q, &s.job))
            .collect();
        due.sort_by_key(|j| j.delayed_until());
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn find_expired_locks(
        &self,
        queue: &QueueName,
        now_millis: i64,
        limit: u32,
    ) -> Result<Vec<Job>> {
        let state = self.lock();
        let Some(q) = state.queue_by_name(queue) else {
            return Ok(vec![]);
        };
        let mut expired: Vec<Job> = state
            .jobs
            .iter()
            .filter(|s| {
                s.queue_id == *q.id()
                    && s.job.status() == JobStatus::Active
                    && s.job.lock_expires_at().is_some_and(|t| t < now_millis)
            })
            .map(|s| StoreState::present(q, &s.job))
            .collect();
        expired.sort_by_key(|j| j.lock_expires_at());
        expired.truncate(limit as usize);
        Ok(expired)
    }

    async fn delete_finished(
        &self,
        queue: &QueueName,
        status: JobStatus,
        finished_before: i64,
        limit: u32,
    ) -> Result<u64> {
        let mut state = self.lock();
        let Some(queue_id) = state.queue_by_name(queue).map(|q| q.id().clone()) else {
            return Ok(0);
        };
        let mut budget = limit as u64;
        let mut deleted = 0;
        state.jobs.retain(|s| {
            let matches = budget > 0
                && s.queue_id == queue_id
                && s.job.status() == status
                && s.job.finished_at().is_some_and(|t| t < finished_before);
            if matches {
                budget -= 1;
                deleted += 1;
            }
            !matches
        });
        Ok(deleted)
    }
}
