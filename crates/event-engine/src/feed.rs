//! Daylight trigger feed
//!
//! Polls the clock and dispatches `sunrise` / `sunset` category events when
//! the daylight state at a fixed coordinate flips.

use crate::clock::Clock;
use crate::dispatcher::Dispatcher;
use crate::model::{Event, EventCategory};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use daylight::Coordinate;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Attribute key holding the current daylight flag
pub const DAYLIGHT_ATTRIBUTE: &str = "daylight";

/// Daylight at an instant, with the upcoming transitions
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaylightState {
    pub coordinate: Coordinate,
    pub daylight: bool,
    pub next_sunrise: DateTime<Utc>,
    pub next_sunset: DateTime<Utc>,
}

impl DaylightState {
    /// Compute the state at `now` for the local calendar day given by `offset`
    #[must_use]
    pub fn at(coordinate: Coordinate, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let today = now.with_timezone(&offset).date_naive();
        let days: Vec<NaiveDate> = (-1..=2).map(|n| today + Duration::days(n)).collect();

        let daylight = days.iter().any(|&date| {
            daylight::sunrise(coordinate, date) <= now && now < daylight::sunset(coordinate, date)
        });

        let next = |edge: fn(Coordinate, NaiveDate) -> DateTime<Utc>| {
            days.iter()
                .map(|&date| edge(coordinate, date))
                .filter(|&at| at > now)
                .min()
                .unwrap_or_else(|| edge(coordinate, today + Duration::days(3)))
        };

        Self {
            coordinate,
            daylight,
            next_sunrise: next(daylight::sunrise),
            next_sunset: next(daylight::sunset),
        }
    }
}

/// Turns daylight transitions into `Sunrise` and `Sunset` dispatches
pub struct DaylightFeed {
    coordinate: Coordinate,
    clock: Arc<dyn Clock>,
    state: Mutex<Option<DaylightState>>,
}

impl DaylightFeed {
    pub fn new(coordinate: Coordinate, clock: Arc<dyn Clock>) -> Self {
        Self {
            coordinate,
            clock,
            state: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    /// Last observed state, `None` before the first observation
    #[must_use]
    pub fn state(&self) -> Option<DaylightState> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recompute daylight and dispatch the matching category on a transition.
    ///
    /// The first observation only records the state. Returns the category
    /// that was dispatched, if any.
    pub fn observe(&self, dispatcher: &Dispatcher) -> Option<EventCategory> {
        let now = self.clock.now();
        let current = DaylightState::at(self.coordinate, now, self.clock.local_offset(now));

        let previous = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(current);

        dispatcher
            .attributes()
            .set(DAYLIGHT_ATTRIBUTE, Some(serde_json::Value::Bool(current.daylight)));
        dispatcher.set_daylight(current);

        let Some(previous) = previous else {
            tracing::info!(
                "Initial daylight state: {} (next sunrise {}, next sunset {})",
                current.daylight,
                current.next_sunrise,
                current.next_sunset
            );
            return None;
        };

        if previous.daylight == current.daylight {
            return None;
        }

        let category = if current.daylight {
            EventCategory::Sunrise
        } else {
            EventCategory::Sunset
        };
        tracing::info!("Daylight changed at {}, triggering {}", now, category);
        dispatcher.dispatch(&Event::category(category));
        Some(category)
    }

    /// Poll every `interval` until `shutdown` turns true
    pub async fn run(
        self: Arc<Self>,
        dispatcher: Arc<Dispatcher>,
        interval: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            "Daylight feed started for {:.4},{:.4}",
            self.coordinate.latitude,
            self.coordinate.longitude
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let feed = self.clone();
                    let dispatcher = dispatcher.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || feed.observe(&dispatcher)).await {
                        tracing::error!("Daylight observation failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Daylight feed stopped");
    }
}
