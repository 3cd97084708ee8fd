// Job Handler Port
// Collaborator-supplied execution of a claimed job

use crate::domain::Job;
use async_trait::async_trait;
use thiserror::Error;

/// Handler-side failure; becomes the job's `failed_reason`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Timed out after {0}ms")]
    Timeout(i64),
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::InvalidPayload(e.to_string())
    }
}

/// Job Handler trait
///
/// Called once per claimed job, on its own task. Must be idempotent: delivery is
/// at-least-once, so a stalled attempt can run again.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process the job. `Ok(value)` completes it with `value` as its return value.
    async fn handle(&self, job: &Job) -> Result<Option<serde_json::Value>, HandlerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with this return value
        Success(Option<serde_json::Value>),
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed
        Slow(Duration),
    }

    /// Mock Job Handler for testing
    pub struct MockJobHandler {
        behavior: MockBehavior,
        call_count: AtomicUsize,
    }

    impl MockJobHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                call_count: AtomicUsize::new(0),
            }
        }
        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success(None))
        }
        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }
        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobHandler for MockJobHandler {
        async fn handle(&self, _job: &Job) -> Result<Option<serde_json::Value>, HandlerError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);

            match &self.behavior {
                MockBehavior::Success(value) => Ok(value.clone()),
                MockBehavior::Fail(msg) => Err(HandlerError::Failed(msg.clone())),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg);
                }
                MockBehavior::Slow(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(None)
                }
            }
        }
    }
}
