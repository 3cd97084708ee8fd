// Queue Service - Facade over one named queue

mod claim;
pub mod enqueue;
mod lifecycle;
mod queries;
mod sweep;

pub use enqueue::{validate_request, NewJob};
pub use sweep::SweepStats;

use crate::application::constants::{DEFAULT_CAS_RETRIES, DEFAULT_LOCK_DURATION_MS};
use crate::domain::{EventKind, EventPayload, Job, JobId, Queue, QueueEvent, QueueName};
use crate::error::{AppError, Result};
use crate::port::{
    EventBus, IdProvider, JobRepository, QueueRepository, SubscriptionId, TimeProvider,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Shared adapters every service and use case is built from
#[derive(Clone)]
pub struct ServiceDeps {
    pub jobs: Arc<dyn JobRepository>,
    pub queues: Arc<dyn QueueRepository>,
    pub events: Arc<dyn EventBus>,
    pub ids: Arc<dyn IdProvider>,
    pub clock: Arc<dyn TimeProvider>,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueServiceConfig {
    /// Claim validity granted by `claim_next` / `renew_lock`
    pub lock_duration_ms: i64,
    /// Reload-and-retry rounds before an optimistic write gives up with `Conflict`
    pub cas_retries: u32,
}

impl Default for QueueServiceConfig {
    fn default() -> Self {
        Self {
            lock_duration_ms: DEFAULT_LOCK_DURATION_MS,
            cas_retries: DEFAULT_CAS_RETRIES,
        }
    }
}

/// Queue Service
///
/// One instance per queue name. The name is fixed at `open`: after a rename through
/// `QueueRegistry` the service must be reopened under the new name, and until then its
/// sweeps fail with `NotFound`. Several instances (in one process or across processes
/// sharing a database) may serve the same queue; the repository's conditional writes
/// keep them consistent. Event subscriptions made through `on` belong to this instance
/// and are dropped by `close`.
pub struct QueueService {
    queue: QueueName,
    deps: ServiceDeps,
    config: QueueServiceConfig,
    paused: AtomicBool,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl QueueService {
    /// Open a service for an existing queue
    ///
    /// # Errors
    /// - `AppError::NotFound` if no queue has this name
    pub async fn open(
        queue: QueueName,
        deps: ServiceDeps,
        config: QueueServiceConfig,
    ) -> Result<Self> {
        require_queue(&deps, &queue).await?;
        debug!(queue = %queue, "Queue service opened");
        Ok(Self {
            queue,
            deps,
            config,
            paused: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// The queue row this service was opened for, or `NotFound` once it is renamed or deleted
    pub(super) async fn current_queue(&self) -> Result<Queue> {
        require_queue(&self.deps, &self.queue).await
    }

    pub fn queue_name(&self) -> &QueueName {
        &self.queue
    }

    pub fn config(&self) -> &QueueServiceConfig {
        &self.config
    }

    /// Look up a job of this queue. The id format is checked before any I/O.
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let id = JobId::parse(id)?;
        self.deps.jobs.find_by_id(&self.queue, &id).await
    }

    /// Stop handing out claims from this instance
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!(queue = %self.queue, "Queue paused");
            self.emit(QueueEvent::for_queue(&self.queue, EventPayload::Paused));
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!(queue = %self.queue, "Queue resumed");
            self.emit(QueueEvent::for_queue(&self.queue, EventPayload::Resumed));
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Subscribe to events of this queue only
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        let queue = self.queue.clone();
        let id = self.deps.events.subscribe(
            kind,
            Arc::new(move |event: &QueueEvent| {
                if event.queue_name == queue {
                    handler(event);
                }
            }),
        );
        self.lock_subscriptions().push(id);
        id
    }

    /// Drop a single subscription made through `on`
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.lock_subscriptions().retain(|s| *s != id);
        self.deps.events.unsubscribe(id)
    }

    /// Remove every handler this instance registered; other instances are untouched
    pub fn close(&self) {
        let ids: Vec<SubscriptionId> = self.lock_subscriptions().drain(..).collect();
        for id in &ids {
            self.deps.events.unsubscribe(*id);
        }
        debug!(queue = %self.queue, removed = ids.len(), "Queue service closed");
    }

    /// Report an error raised outside a job transition (e.g. by a worker loop)
    pub fn report_worker_error(&self, job_id: Option<&JobId>, error: &AppError) {
        self.emit(QueueEvent {
            queue_name: self.queue.clone(),
            job_id: job_id.cloned(),
            payload: EventPayload::WorkerError {
                error: error.to_string(),
            },
        });
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<SubscriptionId>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        self.deps.events.publish(&event);
    }

    fn now(&self) -> i64 {
        self.deps.clock.now_millis()
    }
}

async fn require_queue(deps: &ServiceDeps, name: &QueueName) -> Result<Queue> {
    deps.queues
        .find_by_name(name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("queue '{}'", name)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::domain::{Queue, QueueConcurrency, QueueId, QueueProps};
    use crate::port::mocks::{InMemoryStore, ManualClock, SequentialIdProvider};
    use crate::port::InMemoryEventBus;

    pub const T0: i64 = 1_700_000_000_000;

    pub struct Harness {
        pub store: Arc<InMemoryStore>,
        pub bus: Arc<InMemoryEventBus>,
        pub clock: Arc<ManualClock>,
        pub deps: ServiceDeps,
    }

    impl Harness {
        pub fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let bus = Arc::new(InMemoryEventBus::new());
            let clock = Arc::new(ManualClock::new(T0));
            let deps = ServiceDeps {
                jobs: store.clone(),
                queues: store.clone(),
                events: bus.clone(),
                ids: Arc::new(SequentialIdProvider::default()),
                clock: clock.clone(),
            };
            Self {
                store,
                bus,
                clock,
                deps,
            }
        }

        pub async fn queue(&self, name: &str, concurrency: i64) -> QueueService {
            let queue = Queue::create(QueueProps {
                id: QueueId::parse(uuid::Uuid::new_v4().to_string()).unwrap(),
                name: QueueName::new(name).unwrap(),
                concurrency: QueueConcurrency::new(concurrency).unwrap(),
                description: None,
                now_millis: T0,
            });
            self.deps.queues.save(&queue).await.unwrap();
            QueueService::open(
                queue.name().clone(),
                self.deps.clone(),
                QueueServiceConfig::default(),
            )
            .await
            .unwrap()
        }
    }

    /// Collects every event of one kind delivered to a service
    pub fn record(service: &QueueService, kind: EventKind) -> Arc<Mutex<Vec<QueueEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        service.on(kind, move |e| sink.lock().unwrap().push(e.clone()));
        seen
    }
}
