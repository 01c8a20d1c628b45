//! Listener glue: where fired events go.
use crate::watch::{ListenerId, WatchEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

type Routes = HashMap<ListenerId, mpsc::UnboundedSender<WatchEvent>>;

/// Receives events decided by the engine.
///
/// Delivery is fire-and-forget: implementations must not block and the
/// engine never retries.
pub trait EventSink: Send + Sync {
    /// Hand `event` to `listener`.
    fn deliver(&self, listener: ListenerId, event: WatchEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn deliver(&self, listener: ListenerId, event: WatchEvent) {
        (**self).deliver(listener, event)
    }
}

/// Routes events to per-listener unbounded channels.
#[derive(Default)]
pub struct ChannelSink {
    routes: Mutex<Routes>,
}

impl ChannelSink {
    /// Sink with no listeners attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `listener`, replacing any previous receiver.
    pub fn subscribe(&self, listener: ListenerId) -> mpsc::UnboundedReceiver<WatchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(listener, tx);
        rx
    }

    /// Detach `listener`. Later events for it are dropped.
    pub fn unsubscribe(&self, listener: ListenerId) {
        self.lock().remove(&listener);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, listener: ListenerId, event: WatchEvent) {
        let mut routes = self.lock();
        let Some(route) = routes.get(&listener) else {
            tracing::warn!(%listener, tag = %event.tag(), "no route for listener, event dropped");
            return;
        };
        if route.send(event).is_err() {
            tracing::warn!(%listener, "listener receiver closed, detaching");
            routes.remove(&listener);
        }
    }
}
