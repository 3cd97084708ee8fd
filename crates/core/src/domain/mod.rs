// Domain Layer - Entities, value objects and events

pub mod error;
pub mod event;
pub mod job;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use event::{EventKind, EventPayload, QueueEvent};
pub use job::{
    Backoff, Job, JobExecutionLogs, JobId, JobLogEntry, JobOptions, JobPriority, JobProgress,
    JobProps, JobRecord, JobStatus,
};
pub use queue::{Queue, QueueConcurrency, QueueDescription, QueueId, QueueName, QueueProps};
