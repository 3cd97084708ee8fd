// Engine-wide error type returned across use cases and adapters

use thiserror::Error;

/// Application-level error type
///
/// Every use case and repository returns this on the failure arm. "Not found" lookups are
/// `Ok(None)`, not `NotFound`; `NotFound` is reserved for operations that need the target
/// to exist (e.g. completing a job by id).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the error is an illegal lifecycle transition on an entity
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            AppError::Domain(crate::domain::DomainError::InvalidStateTransition { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
