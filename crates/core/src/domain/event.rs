// Queue lifecycle events

use super::job::{Job, JobId, JobLogEntry};
use super::queue::QueueName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event vocabulary, also used as the bus subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Added,
    Active,
    Completed,
    Failed,
    Progress,
    Stalled,
    Delayed,
    Promoted,
    Removed,
    LogAdded,
    Paused,
    Resumed,
    WorkerError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Added => "added",
            EventKind::Active => "active",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
            EventKind::Progress => "progress",
            EventKind::Stalled => "stalled",
            EventKind::Delayed => "delayed",
            EventKind::Promoted => "promoted",
            EventKind::Removed => "removed",
            EventKind::LogAdded => "log-added",
            EventKind::Paused => "paused",
            EventKind::Resumed => "resumed",
            EventKind::WorkerError => "worker-error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed event body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    Added { job: Job },
    Active { job: Job },
    Completed { job: Job, result: Option<serde_json::Value> },
    Failed { job: Job, error: String, will_retry: bool },
    Progress { progress: serde_json::Value },
    Stalled { job: Job },
    Delayed { delayed_until: i64 },
    Promoted { job: Job },
    Removed { job: Job },
    LogAdded { entry: JobLogEntry },
    Paused,
    Resumed,
    WorkerError { error: String },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Added { .. } => EventKind::Added,
            EventPayload::Active { .. } => EventKind::Active,
            EventPayload::Completed { .. } => EventKind::Completed,
            EventPayload::Failed { .. } => EventKind::Failed,
            EventPayload::Progress { .. } => EventKind::Progress,
            EventPayload::Stalled { .. } => EventKind::Stalled,
            EventPayload::Delayed { .. } => EventKind::Delayed,
            EventPayload::Promoted { .. } => EventKind::Promoted,
            EventPayload::Removed { .. } => EventKind::Removed,
            EventPayload::LogAdded { .. } => EventKind::LogAdded,
            EventPayload::Paused => EventKind::Paused,
            EventPayload::Resumed => EventKind::Resumed,
            EventPayload::WorkerError { .. } => EventKind::WorkerError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub queue_name: QueueName,
    /// None for queue-level events (paused, resumed, worker-error without a job)
    pub job_id: Option<JobId>,
    pub payload: EventPayload,
}

impl QueueEvent {
    pub fn for_job(job: &Job, payload: EventPayload) -> Self {
        Self {
            queue_name: job.queue_name().clone(),
            job_id: Some(job.id().clone()),
            payload,
        }
    }

    pub fn for_queue(queue_name: &QueueName, payload: EventPayload) -> Self {
        Self {
            queue_name: queue_name.clone(),
            job_id: None,
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
