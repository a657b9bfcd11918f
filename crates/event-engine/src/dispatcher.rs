//! Delivery of fired events to registered handlers

use crate::context::{Attributes, ChangeRecorder, EventContext};
use crate::error::HandlerFailure;
use crate::feed::DaylightState;
use crate::model::Event;
use crate::registry::EventRegistry;
use crate::scheduler::Scheduler;
use device_store::{Device, DeviceStore, StoreError};
use holidays::HolidayCalendar;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

/// Device-changed events delivered after a single dispatch, at most
const MAX_DEVICE_EVENTS: usize = 64;

/// Events emitted by the dispatcher
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An event was delivered to its handlers
    Dispatched { event: String, handlers: usize },
    /// A handler failed while processing an event
    HandlerFailed(HandlerFailure),
}

/// Result of dispatching a single event
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Number of handlers invoked
    pub invoked: usize,
    /// Handlers that returned an error or panicked
    pub failures: Vec<HandlerFailure>,
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolves handlers for an event and invokes them in registration order.
///
/// Scheduler-fired and externally triggered events share this path. One
/// dispatch runs at a time; handler failures are isolated.
///
/// Device state changes made by handlers are turned into
/// [`Event::DeviceChanged`] dispatches once the triggering dispatch has
/// finished.
pub struct Dispatcher {
    registry: Arc<EventRegistry>,
    scheduler: Arc<Scheduler>,
    store: Arc<dyn DeviceStore>,
    attributes: Attributes,
    daylight: Mutex<Option<DaylightState>>,
    holidays: Mutex<Arc<HolidayCalendar>>,
    dispatch_lock: Mutex<()>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        registry: Arc<EventRegistry>,
        scheduler: Arc<Scheduler>,
        store: Arc<dyn DeviceStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            registry,
            scheduler,
            store,
            attributes: Attributes::new(),
            daylight: Mutex::new(None),
            holidays: Mutex::new(Arc::new(HolidayCalendar::none())),
            dispatch_lock: Mutex::new(()),
            event_tx,
        }
    }

    /// Subscribe to dispatcher events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Attributes shared by every dispatch context
    #[must_use]
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// The underlying store, bypassing device-changed delivery
    #[must_use]
    pub fn store(&self) -> &dyn DeviceStore {
        self.store.as_ref()
    }

    /// Daylight state exposed to handlers from the next dispatch on
    pub fn set_daylight(&self, state: DaylightState) {
        *self.daylight.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    #[must_use]
    pub fn daylight(&self) -> Option<DaylightState> {
        *self.daylight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the holiday calendar consulted by `EventContext::is_holiday`
    pub fn set_holidays(&self, calendar: HolidayCalendar) {
        *self.holidays.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(calendar);
    }

    fn holidays(&self) -> Arc<HolidayCalendar> {
        self.holidays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Update a device from outside any handler.
    ///
    /// Dispatches [`Event::DeviceChanged`] when the stored state actually
    /// changed. Handlers must write through `EventContext::store` instead;
    /// calling this from a handler deadlocks.
    pub fn update_device(&self, id: &str, device: Device) -> Result<Device, StoreError> {
        let recorder = ChangeRecorder::new(self.store.as_ref());
        let updated = recorder.update(id, device)?;
        self.deliver_device_changes(recorder.into_changes());
        Ok(updated)
    }

    /// Invoke every handler registered for `event`.
    ///
    /// A handler that returns an error or panics is reported as a
    /// [`HandlerFailure`] and the remaining handlers still run. Its partial
    /// side effects are kept.
    ///
    /// Devices changed by the handlers are delivered as device-changed
    /// events before this returns. Their outcomes are logged and broadcast
    /// but not included in the returned outcome.
    pub fn dispatch(&self, event: &Event) -> DispatchOutcome {
        let (outcome, changed) = self.dispatch_one(event);
        self.deliver_device_changes(changed);
        outcome
    }

    fn deliver_device_changes(&self, changed: Vec<Device>) {
        let mut queue = VecDeque::from(changed);
        let mut delivered = 0;

        while let Some(device) = queue.pop_front() {
            if delivered == MAX_DEVICE_EVENTS {
                tracing::warn!(
                    "Dropping {} device change events after {} deliveries",
                    queue.len() + 1,
                    MAX_DEVICE_EVENTS
                );
                return;
            }
            delivered += 1;

            let (_, more) = self.dispatch_one(&Event::DeviceChanged { device });
            queue.extend(more);
        }
    }

    /// Run the handlers for `event` under the dispatch lock and return the
    /// devices they changed
    fn dispatch_one(&self, event: &Event) -> (DispatchOutcome, Vec<Device>) {
        let _guard = self
            .dispatch_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let handlers = self.registry.lookup(event);
        if handlers.is_empty() {
            tracing::debug!("No handlers for event {}, dropping", event);
            return (DispatchOutcome::default(), Vec::new());
        }

        tracing::debug!("Dispatching {} to {} handlers", event, handlers.len());

        let holidays = self.holidays();
        let store = ChangeRecorder::new(self.store.as_ref());
        let context = EventContext::new(
            &self.scheduler,
            &store,
            &self.attributes,
            self.daylight(),
            &holidays,
        );
        let mut failures = Vec::new();

        for handler in &handlers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler.call(&context, event)));
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
            };

            let failure = HandlerFailure {
                event: event.to_string(),
                handler: handler.label().to_string(),
                error,
            };
            tracing::error!("{}", failure);
            let _ = self.event_tx.send(EngineEvent::HandlerFailed(failure.clone()));
            failures.push(failure);
        }

        let _ = self.event_tx.send(EngineEvent::Dispatched {
            event: event.to_string(),
            handlers: handlers.len(),
        });

        let outcome = DispatchOutcome {
            invoked: handlers.len(),
            failures,
        };
        (outcome, store.into_changes())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
