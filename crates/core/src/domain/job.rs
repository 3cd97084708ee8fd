// Job Domain Model

use super::error::{DomainError, Result};
use super::queue::QueueName;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const JOB_PRIORITY_MIN: i64 = 0;
pub const JOB_PRIORITY_MAX: i64 = 100;
pub const DEFAULT_JOB_ATTEMPTS: u32 = 1;

/// Job ID (UUID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Validates the UUID format without touching storage
    pub fn parse(s: impl AsRef<str>) -> Result<Self> {
        let s = s.as_ref();
        let parsed = uuid::Uuid::parse_str(s).map_err(|_| DomainError::InvalidId(s.to_string()))?;
        Ok(Self(parsed.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Delayed,
    Active,
    Completed,
    Failed,
    Stalled,
    Removed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Delayed,
        JobStatus::Active,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Stalled,
        JobStatus::Removed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stalled => "stalled",
            JobStatus::Removed => "removed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Removed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::ValidationError(format!("unknown job status '{}'", s)))
    }
}

/// Priority (higher number = served first), in [0, 100]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct JobPriority(i64);

impl JobPriority {
    pub fn new(value: i64) -> Result<Self> {
        if !(JOB_PRIORITY_MIN..=JOB_PRIORITY_MAX).contains(&value) {
            return Err(DomainError::InvalidPriority(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for JobPriority {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<JobPriority> for i64 {
    fn from(p: JobPriority) -> Self {
        p.0
    }
}

/// Retry delay policy applied after a failed or stalled attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// Retry immediately (back to pending)
    #[default]
    None,
    /// Same delay before every retry
    Fixed { delay_ms: i64 },
    /// delay_ms * 2^(attempt - 1)
    Exponential { delay_ms: i64 },
}

impl Backoff {
    /// Delay before the next attempt, given the attempts already made (>= 1)
    pub fn delay_for_attempt(&self, attempts_made: u32) -> i64 {
        match *self {
            Backoff::None => 0,
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { delay_ms } => {
                let exponent = attempts_made.saturating_sub(1).min(30);
                delay_ms.saturating_mul(1_i64 << exponent)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            Backoff::None => Ok(()),
            Backoff::Fixed { delay_ms } | Backoff::Exponential { delay_ms } if delay_ms <= 0 => {
                Err(DomainError::InvalidOptions(
                    "backoff delay must be greater than 0".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Enqueue-time options. Fixed once the job exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub priority: i64,
    /// Total attempts allowed (first run included)
    pub attempts: u32,
    /// Milliseconds before the job first becomes eligible
    pub delay_ms: i64,
    pub backoff: Backoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            attempts: DEFAULT_JOB_ATTEMPTS,
            delay_ms: 0,
            backoff: Backoff::None,
        }
    }
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Validate and return the typed priority
    pub fn validate(&self) -> Result<JobPriority> {
        let priority = JobPriority::new(self.priority)?;
        if self.attempts < 1 {
            return Err(DomainError::InvalidOptions("attempts must be at least 1".into()));
        }
        if self.delay_ms < 0 {
            return Err(DomainError::InvalidOptions(format!(
                "delay cannot be negative ({}ms)",
                self.delay_ms
            )));
        }
        self.backoff.validate()?;
        Ok(priority)
    }
}

/// Opaque progress payload (percentage, structured data, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobProgress(Option<serde_json::Value>);

impl JobProgress {
    pub fn new(value: serde_json::Value) -> Self {
        Self(Some(value))
    }

    pub fn as_value(&self) -> Option<&serde_json::Value> {
        self.0.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub timestamp: i64,
    pub message: String,
}

/// Append-only execution log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobExecutionLogs(Vec<JobLogEntry>);

impl JobExecutionLogs {
    pub fn from_entries(entries: Vec<JobLogEntry>) -> Self {
        Self(entries)
    }

    pub fn appended(&self, entry: JobLogEntry) -> Self {
        let mut entries = self.0.clone();
        entries.push(entry);
        Self(entries)
    }

    pub fn entries(&self) -> &[JobLogEntry] {
        &self.0
    }

    pub fn last(&self) -> Option<&JobLogEntry> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Input for [`Job::create`]
#[derive(Debug, Clone)]
pub struct JobProps {
    pub id: JobId,
    pub queue_name: QueueName,
    pub job_name: String,
    pub payload: serde_json::Value,
    pub opts: JobOptions,
    pub now_millis: i64,
}

/// Every persisted column of a job, used by adapters to rebuild the entity
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub queue_name: QueueName,
    pub job_name: String,
    pub payload: serde_json::Value,
    pub opts: JobOptions,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub progress: JobProgress,
    pub return_value: Option<serde_json::Value>,
    pub attempts_made: u32,
    pub execution_logs: JobExecutionLogs,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub failed_reason: Option<String>,
    pub delayed_until: Option<i64>,
    pub lock_expires_at: Option<i64>,
    pub revision: i64,
}

/// Job Entity
///
/// Copy-on-write: every lifecycle method borrows `self` and returns a new `Job`, so a
/// snapshot handed to another task never changes under it. `payload` and `opts` are
/// set at creation and never touched again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    queue_name: QueueName,
    job_name: String,
    payload: serde_json::Value,
    opts: JobOptions,
    status: JobStatus,
    priority: JobPriority,
    progress: JobProgress,
    return_value: Option<serde_json::Value>,
    attempts_made: u32,
    execution_logs: JobExecutionLogs,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    failed_reason: Option<String>,
    delayed_until: Option<i64>,
    lock_expires_at: Option<i64>,
    /// Optimistic-concurrency stamp, bumped by the repository on every write
    revision: i64,
}

impl Job {
    pub fn create(props: JobProps) -> Result<Self> {
        if props.job_name.trim().is_empty() {
            return Err(DomainError::ValidationError("job name cannot be empty".into()));
        }
        let priority = props.opts.validate()?;

        let (status, delayed_until) = if props.opts.delay_ms > 0 {
            (
                JobStatus::Delayed,
                Some(props.now_millis.saturating_add(props.opts.delay_ms)),
            )
        } else {
            (JobStatus::Pending, None)
        };

        Ok(Self {
            id: props.id,
            queue_name: props.queue_name,
            job_name: props.job_name,
            payload: props.payload,
            opts: props.opts,
            status,
            priority,
            progress: JobProgress::default(),
            return_value: None,
            attempts_made: 0,
            execution_logs: JobExecutionLogs::default(),
            created_at: props.now_millis,
            updated_at: props.now_millis,
            started_at: None,
            finished_at: None,
            failed_reason: None,
            delayed_until,
            lock_expires_at: None,
            revision: 0,
        })
    }

    pub fn restore(record: JobRecord) -> Self {
        Self {
            id: record.id,
            queue_name: record.queue_name,
            job_name: record.job_name,
            payload: record.payload,
            opts: record.opts,
            status: record.status,
            priority: record.priority,
            progress: record.progress,
            return_value: record.return_value,
            attempts_made: record.attempts_made,
            execution_logs: record.execution_logs,
            created_at: record.created_at,
            updated_at: record.updated_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            failed_reason: record.failed_reason,
            delayed_until: record.delayed_until,
            lock_expires_at: record.lock_expires_at,
            revision: record.revision,
        }
    }

    /// Inverse of [`Job::restore`]
    pub fn into_record(self) -> JobRecord {
        JobRecord {
            id: self.id,
            queue_name: self.queue_name,
            job_name: self.job_name,
            payload: self.payload,
            opts: self.opts,
            status: self.status,
            priority: self.priority,
            progress: self.progress,
            return_value: self.return_value,
            attempts_made: self.attempts_made,
            execution_logs: self.execution_logs,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            failed_reason: self.failed_reason,
            delayed_until: self.delayed_until,
            lock_expires_at: self.lock_expires_at,
            revision: self.revision,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }
    pub fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }
    pub fn job_name(&self) -> &str {
        &self.job_name
    }
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
    pub fn opts(&self) -> &JobOptions {
        &self.opts
    }
    pub fn status(&self) -> JobStatus {
        self.status
    }
    pub fn priority(&self) -> JobPriority {
        self.priority
    }
    pub fn progress(&self) -> &JobProgress {
        &self.progress
    }
    pub fn return_value(&self) -> Option<&serde_json::Value> {
        self.return_value.as_ref()
    }
    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }
    pub fn execution_logs(&self) -> &JobExecutionLogs {
        &self.execution_logs
    }
    pub fn created_at(&self) -> i64 {
        self.created_at
    }
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }
    pub fn started_at(&self) -> Option<i64> {
        self.started_at
    }
    pub fn finished_at(&self) -> Option<i64> {
        self.finished_at
    }
    pub fn failed_reason(&self) -> Option<&str> {
        self.failed_reason.as_deref()
    }
    pub fn delayed_until(&self) -> Option<i64> {
        self.delayed_until
    }
    pub fn lock_expires_at(&self) -> Option<i64> {
        self.lock_expires_at
    }
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Deserialize the opaque payload into the caller's type
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }

    pub fn return_value_as<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.return_value.as_ref().map(T::deserialize)
    }

    /// Copy reflecting a successful optimistic write
    pub fn with_next_revision(&self) -> Self {
        Self {
            revision: self.revision + 1,
            ..self.clone()
        }
    }

    /// Pending, or delayed with an elapsed `delayed_until`
    pub fn is_claimable(&self, now_millis: i64) -> bool {
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Delayed => self.is_due(now_millis),
            _ => false,
        }
    }

    pub fn is_due(&self, now_millis: i64) -> bool {
        self.delayed_until.map_or(true, |until| until <= now_millis)
    }

    /// Dispatch order: priority DESC, then created_at ASC
    pub fn dispatch_cmp(&self, other: &Job) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.created_at.cmp(&other.created_at))
    }

    fn illegal(&self, to: JobStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// Schedules the next attempt: delayed when the backoff policy yields a delay
    fn retry_state(&self, now_millis: i64) -> (JobStatus, Option<i64>) {
        let delay = self.opts.backoff.delay_for_attempt(self.attempts_made);
        if delay > 0 {
            (JobStatus::Delayed, Some(now_millis.saturating_add(delay)))
        } else {
            (JobStatus::Pending, None)
        }
    }

    pub fn mark_active(&self, now_millis: i64, lock_duration_ms: i64) -> Result<Self> {
        let allowed = match self.status {
            JobStatus::Pending | JobStatus::Stalled => true,
            JobStatus::Delayed => self.is_due(now_millis),
            _ => false,
        };
        if !allowed {
            return Err(self.illegal(JobStatus::Active));
        }
        Ok(Self {
            status: JobStatus::Active,
            started_at: Some(now_millis),
            delayed_until: None,
            lock_expires_at: Some(now_millis.saturating_add(lock_duration_ms)),
            updated_at: now_millis,
            ..self.clone()
        })
    }

    /// Heartbeat: push the claim deadline forward
    pub fn renew_lock(&self, now_millis: i64, lock_duration_ms: i64) -> Result<Self> {
        if self.status != JobStatus::Active {
            return Err(self.illegal(JobStatus::Active));
        }
        Ok(Self {
            lock_expires_at: Some(now_millis.saturating_add(lock_duration_ms)),
            updated_at: now_millis,
            ..self.clone()
        })
    }

    pub fn mark_completed(
        &self,
        result: Option<serde_json::Value>,
        now_millis: i64,
    ) -> Result<Self> {
        if self.status != JobStatus::Active {
            return Err(self.illegal(JobStatus::Completed));
        }
        Ok(Self {
            status: JobStatus::Completed,
            return_value: result,
            finished_at: Some(now_millis),
            failed_reason: None,
            lock_expires_at: None,
            updated_at: now_millis,
            ..self.clone()
        })
    }

    /// Record a failed attempt; retries while attempts remain, else terminal `failed`
    pub fn mark_failed(&self, reason: impl Into<String>, now_millis: i64) -> Result<Self> {
        if self.status != JobStatus::Active {
            return Err(self.illegal(JobStatus::Failed));
        }
        let attempted = Self {
            attempts_made: self.attempts_made + 1,
            failed_reason: Some(reason.into()),
            lock_expires_at: None,
            updated_at: now_millis,
            ..self.clone()
        };

        if attempted.attempts_made >= attempted.opts.attempts {
            return Ok(Self {
                status: JobStatus::Failed,
                finished_at: Some(now_millis),
                ..attempted
            });
        }

        let (status, delayed_until) = attempted.retry_state(now_millis);
        Ok(Self {
            status,
            delayed_until,
            started_at: None,
            ..attempted
        })
    }

    /// Claim expired without resolution; the lost attempt counts toward the budget
    pub fn mark_stalled(&self, now_millis: i64) -> Result<Self> {
        if self.status != JobStatus::Active {
            return Err(self.illegal(JobStatus::Stalled));
        }
        let entry = JobLogEntry {
            timestamp: now_millis,
            message: format!(
                "claim expired at {} without completion",
                self.lock_expires_at.unwrap_or(now_millis)
            ),
        };
        Ok(Self {
            status: JobStatus::Stalled,
            attempts_made: self.attempts_made + 1,
            lock_expires_at: None,
            execution_logs: self.execution_logs.appended(entry),
            updated_at: now_millis,
            ..self.clone()
        })
    }

    /// Put a stalled job back in line, or fail it once the retry budget is spent
    pub fn requeue_stalled(&self, now_millis: i64) -> Result<Self> {
        if self.status != JobStatus::Stalled {
            return Err(self.illegal(JobStatus::Pending));
        }
        if self.attempts_made >= self.opts.attempts {
            return Ok(Self {
                status: JobStatus::Failed,
                failed_reason: Some(
                    self.failed_reason
                        .clone()
                        .unwrap_or_else(|| "job stalled and exhausted its attempts".to_string()),
                ),
                finished_at: Some(now_millis),
                updated_at: now_millis,
                ..self.clone()
            });
        }
        let (status, delayed_until) = self.retry_state(now_millis);
        Ok(Self {
            status,
            delayed_until,
            started_at: None,
            updated_at: now_millis,
            ..self.clone()
        })
    }

    /// Due delayed job → pending
    pub fn promote(&self, now_millis: i64) -> Result<Self> {
        if self.status != JobStatus::Delayed || !self.is_due(now_millis) {
            return Err(self.illegal(JobStatus::Pending));
        }
        Ok(Self {
            status: JobStatus::Pending,
            delayed_until: None,
            updated_at: now_millis,
            ..self.clone()
        })
    }

    /// Administrative removal. Terminal jobs are returned unchanged.
    pub fn remove(&self, now_millis: i64) -> Self {
        if self.status.is_terminal() {
            return self.clone();
        }
        Self {
            status: JobStatus::Removed,
            finished_at: Some(now_millis),
            lock_expires_at: None,
            updated_at: now_millis,
            ..self.clone()
        }
    }

    pub fn append_log(&self, message: impl Into<String>, now_millis: i64) -> Result<Self> {
        if self.status.is_terminal() {
            return Err(self.illegal(self.status));
        }
        let entry = JobLogEntry {
            timestamp: now_millis,
            message: message.into(),
        };
        Ok(Self {
            execution_logs: self.execution_logs.appended(entry),
            updated_at: now_millis,
            ..self.clone()
        })
    }

    pub fn update_progress(&self, progress: serde_json::Value, now_millis: i64) -> Result<Self> {
        if self.status.is_terminal() {
            return Err(self.illegal(self.status));
        }
        Ok(Self {
            progress: JobProgress::new(progress),
            updated_at: now_millis,
            ..self.clone()
        })
    }
}
