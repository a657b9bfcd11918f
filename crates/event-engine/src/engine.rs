//! Engine lifecycle: wiring, startup and shutdown

use crate::clock::{Clock, RandomSource};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::feed::DaylightFeed;
use crate::model::{Event, EventCategory, NamedEvent};
use crate::registry::EventRegistry;
use crate::scheduler::Scheduler;
use device_store::{Device, DeviceStore, StoreError};
use holidays::HolidayCalendar;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The event engine
pub struct EventEngine {
    /// Handlers by selector
    registry: Arc<EventRegistry>,
    /// Pending events and the timing loop
    scheduler: Arc<Scheduler>,
    /// Shared delivery path
    dispatcher: Arc<Dispatcher>,
    /// Stops the background tasks
    shutdown_tx: watch::Sender<bool>,
    /// Background tasks awaited on stop
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl EventEngine {
    /// Wire registry, scheduler and dispatcher around a device store
    pub fn new(
        store: Arc<dyn DeviceStore>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let registry = Arc::new(EventRegistry::new());
        let scheduler = Arc::new(Scheduler::new(clock, random));
        Self::with_scheduler(store, registry, scheduler)
    }

    /// Wire the engine around an existing scheduler
    pub fn with_scheduler(
        store: Arc<dyn DeviceStore>,
        registry: Arc<EventRegistry>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            scheduler.clone(),
            store,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            registry,
            scheduler,
            dispatcher,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Receiver that turns true once the engine is stopping
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Dispatch an externally triggered event right away
    pub fn trigger(&self, event: &Event) -> DispatchOutcome {
        tracing::info!("Triggering {}", event);
        self.dispatcher.dispatch(event)
    }

    /// Switch a device and deliver the resulting device-changed event
    pub fn set_power(&self, id: &str, on: bool) -> Result<Device, StoreError> {
        let mut device = self.dispatcher.store().get_by_id(id)?;
        device.on = on;
        self.dispatcher.update_device(id, device)
    }

    /// Holiday calendar consulted by handlers
    pub fn set_holidays(&self, calendar: HolidayCalendar) {
        tracing::info!("Using holiday calendar with {} holidays", calendar.holidays().len());
        self.dispatcher.set_holidays(calendar);
    }

    /// Dispatch a named event right away, outside the pending queue
    pub fn trigger_named(&self, name: &str) -> DispatchOutcome {
        let event = NamedEvent::new(name, self.scheduler.clock().now(), None);
        self.trigger(&Event::Named(event))
    }

    /// Dispatch `Startup` and spawn the timing loop.
    ///
    /// Must be called from within a tokio runtime. Later calls are ignored.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Event engine already started");
            return;
        }

        self.dispatcher.dispatch(&Event::category(EventCategory::Startup));

        let handle = tokio::spawn(
            self.scheduler
                .clone()
                .run(self.dispatcher.clone(), self.shutdown_tx.subscribe()),
        );
        self.track(handle);
        tracing::info!("Event engine started");
    }

    /// Spawn a daylight feed polling every `interval`
    pub fn attach_feed(&self, feed: Arc<DaylightFeed>, interval: std::time::Duration) {
        let handle = tokio::spawn(feed.run(
            self.dispatcher.clone(),
            interval,
            self.shutdown_tx.subscribe(),
        ));
        self.track(handle);
    }

    /// Stop the background tasks, wait for them, then dispatch `Shutdown`.
    ///
    /// Pending events are abandoned.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let tasks = std::mem::take(&mut *self.lock_tasks());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Engine task ended abnormally: {}", e);
            }
        }

        let dispatcher = self.dispatcher.clone();
        let shutdown = tokio::task::spawn_blocking(move || {
            dispatcher.dispatch(&Event::category(EventCategory::Shutdown));
        });
        if let Err(e) = shutdown.await {
            tracing::error!("Shutdown dispatch failed: {}", e);
        }
        tracing::info!(
            "Event engine stopped with {} pending events",
            self.scheduler.len()
        );
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.lock_tasks().push(handle);
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
