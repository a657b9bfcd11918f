//! Handler registration keyed by event name or category

use crate::context::EventContext;
use crate::error::HandlerError;
use crate::model::{Event, Selector};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Callback = dyn Fn(&EventContext<'_>, &Event) -> Result<(), HandlerError> + Send + Sync;

/// A labelled event callback
#[derive(Clone)]
pub struct Handler {
    label: Arc<str>,
    callback: Arc<Callback>,
}

impl Handler {
    /// Wrap a callback; the label identifies the handler in logs and failures
    pub fn new<F>(label: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&EventContext<'_>, &Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            label: Arc::from(label.into()),
            callback: Arc::new(callback),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Invoke the callback
    pub fn call(&self, context: &EventContext<'_>, event: &Event) -> Result<(), HandlerError> {
        (self.callback)(context, event)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("label", &self.label).finish()
    }
}

/// Identifies a registration so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Ordered handler lists per selector.
///
/// Insertion order is dispatch order. Lookups clone the list, so handlers
/// may register further handlers while a dispatch is in progress.
#[derive(Default)]
pub struct EventRegistry {
    handlers: DashMap<Selector, Vec<(HandlerId, Handler)>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the list for `selector`
    pub fn register(&self, selector: Selector, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!("Registered handler '{}' for {}", handler.label(), selector);
        self.handlers
            .entry(selector)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler; returns whether it was registered
    pub fn unregister(&self, selector: &Selector, id: HandlerId) -> bool {
        let Some(mut handlers) = self.handlers.get_mut(selector) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        let removed = handlers.len() != before;
        if removed {
            tracing::debug!("Unregistered handler {:?} for {}", id, selector);
        }
        removed
    }

    /// Handlers for an event, in registration order (possibly empty)
    #[must_use]
    pub fn lookup(&self, event: &Event) -> Vec<Handler> {
        self.handlers
            .get(&event.selector())
            .map(|r| r.value().iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of handlers registered for `selector`
    #[must_use]
    pub fn handler_count(&self, selector: &Selector) -> usize {
        self.handlers.get(selector).map_or(0, |r| r.value().len())
    }
}
