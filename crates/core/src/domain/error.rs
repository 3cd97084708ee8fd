// Domain Error Types

use thiserror::Error;

/// Construction and transition errors raised by entities and value objects
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("Invalid queue concurrency: {0}")]
    InvalidConcurrency(String),

    #[error("Invalid queue description: {0}")]
    InvalidDescription(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(i64),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Invalid job options: {0}")]
    InvalidOptions(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
