// Port Layer - Interfaces for external dependencies

pub mod event_bus;
pub mod id_provider; // For deterministic testing
pub mod job_handler;
pub mod job_repository;
pub mod mocks;
pub mod queue_repository;
pub mod time_provider;

// Re-exports
pub use event_bus::{EventBus, EventHandler, InMemoryEventBus, SubscriptionId};
pub use id_provider::{IdProvider, UuidProvider};
pub use job_handler::{HandlerError, JobHandler};
pub use job_repository::JobRepository;
pub use queue_repository::QueueRepository;
pub use time_provider::{SystemTimeProvider, TimeProvider};
