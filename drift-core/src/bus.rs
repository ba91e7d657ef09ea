//! In-process publish/subscribe dispatcher.
//!
//! All daemon components communicate through one [`EventBus`]: the filesystem
//! watcher, the network action queue, and the hash worker push [`SyncEvent`]s,
//! and every subscriber sees every event in registration order. Dispatch is
//! synchronous and serialized - two publications never interleave, and a
//! handler that publishes is processed depth-first before the outer dispatch
//! moves on to its next subscriber.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{trace, warn};

use crate::error::Result;
use drift_model::SyncEvent;

/// A bus listener. One trait method covers all events; a subscriber that has
/// no interest in a given variant simply returns `Ok(())`.
///
/// Handlers run on the publisher's thread and must not block on I/O. A
/// handler may publish further events through the `bus` argument and may
/// subscribe or unsubscribe listeners mid-dispatch.
pub trait Subscriber: Send + Sync {
    /// Identity used when logging handler faults.
    fn name(&self) -> &str {
        "subscriber"
    }

    fn handle_event(&self, event: &SyncEvent, bus: &EventBus) -> Result<()>;
}

/// Synchronous fan-out dispatcher for [`SyncEvent`]s.
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<dyn Subscriber>>>,
    // Serializes dispatch across threads while allowing the same thread to
    // publish re-entrantly from inside a handler.
    dispatch: ReentrantMutex<()>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            dispatch: ReentrantMutex::new(()),
        }
    }

    /// Register a listener. Listeners are invoked in registration order and
    /// may be added from inside a handler; a listener added mid-dispatch
    /// first sees the next published event.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.lock().push(subscriber);
    }

    /// Remove a listener by identity. Safe to call from inside a handler:
    /// the removed listener receives no further events, including the one
    /// currently being dispatched.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        self.subscribers
            .lock()
            .retain(|existing| !Arc::ptr_eq(existing, subscriber));
    }

    /// Synchronously deliver `event` to every listener registered at the
    /// moment publication starts. Fire-and-forget: handler errors are logged
    /// and never propagated to the publisher.
    pub fn publish(&self, event: SyncEvent) {
        let _serial = self.dispatch.lock();
        trace!(event = %event.kind(), "dispatch");

        // Snapshot so that handlers mutating the subscriber list cannot
        // invalidate the iteration.
        let snapshot: Vec<Arc<dyn Subscriber>> =
            self.subscribers.lock().clone();

        for subscriber in snapshot {
            if !self.is_subscribed(&subscriber) {
                continue;
            }
            if let Err(err) = subscriber.handle_event(&event, self) {
                warn!(
                    event = %event.kind(),
                    subscriber = subscriber.name(),
                    error = %err,
                    "event handler failed; continuing dispatch"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn is_subscribed(&self, subscriber: &Arc<dyn Subscriber>) -> bool {
        self.subscribers
            .lock()
            .iter()
            .any(|existing| Arc::ptr_eq(existing, subscriber))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
