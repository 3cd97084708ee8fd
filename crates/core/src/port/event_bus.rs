// Event Bus Port
// Process-wide fan-out of queue lifecycle events to synchronous handlers

use crate::domain::{EventKind, QueueEvent};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::error;

/// Callback invoked for every published event of the subscribed kind
pub type EventHandler = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub trait EventBus: Send + Sync {
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId;

    /// Returns false if the subscription was already gone
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Deliver to every handler of `event.kind()`. A panicking handler is logged and skipped.
    fn publish(&self, event: &QueueEvent);
}

type HandlerMap = HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>;

/// In-process bus shared by every queue service
#[derive(Default)]
pub struct InMemoryEventBus {
    next_id: AtomicU64,
    handlers: RwLock<HandlerMap>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl EventBus for InMemoryEventBus {
    fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(sub, _)| *sub != id);
            removed |= list.len() != before;
        }
        removed
    }

    fn publish(&self, event: &QueueEvent) {
        // Snapshot so handlers can (un)subscribe without deadlocking
        let targets: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in targets {
            if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                error!(
                    event = %event.kind(),
                    queue = %event.queue_name,
                    panic_msg = %panic_msg,
                    "Event handler panicked"
                );
            }
        }
    }
}
