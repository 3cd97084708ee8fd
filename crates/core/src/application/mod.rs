// Application Layer - Use Cases and Business Logic

pub mod constants;
pub mod queue_registry;
pub mod queue_service;
pub mod sweeper;
pub mod worker;

// Re-exports
pub use queue_registry::QueueRegistry;
pub use queue_service::{NewJob, QueueService, QueueServiceConfig, ServiceDeps, SweepStats};
pub use sweeper::Sweeper;
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerConfig};
