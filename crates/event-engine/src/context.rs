//! Per-dispatch context handed to event handlers

use crate::clock::{Clock, RandomSource};
use crate::feed::DaylightState;
use crate::scheduler::Scheduler;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use dashmap::DashMap;
use daylight::Coordinate;
use device_store::{Device, DeviceStore, StoreError};
use holidays::HolidayCalendar;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

/// Key/value data shared between dispatches
#[derive(Debug, Default)]
pub struct Attributes {
    values: DashMap<String, Value>,
}

impl Attributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute; `None` removes it
    pub fn set(&self, key: impl Into<String>, value: Option<Value>) {
        let key = key.into();
        match value {
            Some(value) => {
                self.values.insert(key, value);
            }
            None => {
                self.values.remove(&key);
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|r| r.value().clone())
    }

    /// Get an attribute rendered as a string
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, v)| v)
    }
}

/// Everything a handler may touch while it runs.
///
/// Built per dispatch and borrowed by the handler for the duration of the
/// call only.
pub struct EventContext<'a> {
    clock: &'a dyn Clock,
    random: &'a dyn RandomSource,
    store: &'a dyn DeviceStore,
    scheduler: &'a Scheduler,
    attributes: &'a Attributes,
    daylight: Option<DaylightState>,
    holidays: &'a HolidayCalendar,
}

impl<'a> EventContext<'a> {
    pub(crate) fn new(
        scheduler: &'a Scheduler,
        store: &'a dyn DeviceStore,
        attributes: &'a Attributes,
        daylight: Option<DaylightState>,
        holidays: &'a HolidayCalendar,
    ) -> Self {
        Self {
            clock: scheduler.clock(),
            random: scheduler.random(),
            store,
            scheduler,
            attributes,
            daylight,
            holidays,
        }
    }

    /// Current instant
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current local wall-clock time
    #[must_use]
    pub fn local_now(&self) -> DateTime<FixedOffset> {
        self.clock.local_now()
    }

    /// Local hour of day (0-23)
    #[must_use]
    pub fn hour(&self) -> u32 {
        self.local_now().hour()
    }

    /// Local minute of the hour
    #[must_use]
    pub fn minute(&self) -> u32 {
        self.local_now().minute()
    }

    /// Whether today (local date) is a holiday
    #[must_use]
    pub fn is_holiday(&self) -> bool {
        self.holidays.is_holiday(self.local_now().date_naive())
    }

    /// Last observed daylight state, `None` until the feed has reported
    #[must_use]
    pub fn daylight(&self) -> Option<DaylightState> {
        self.daylight
    }

    #[must_use]
    pub fn next_sunrise(&self) -> Option<DateTime<Utc>> {
        self.daylight.map(|state| state.next_sunrise)
    }

    #[must_use]
    pub fn next_sunset(&self) -> Option<DateTime<Utc>> {
        self.daylight.map(|state| state.next_sunset)
    }

    /// Site coordinate the daylight state was computed for
    #[must_use]
    pub fn coordinate(&self) -> Option<Coordinate> {
        self.daylight.map(|state| state.coordinate)
    }

    /// Uniform random value in `[0, bound)`
    #[must_use]
    pub fn random_below(&self, bound: u64) -> u64 {
        self.random.next_below(bound)
    }

    /// Device state
    #[must_use]
    pub fn store(&self) -> &'a dyn DeviceStore {
        self.store
    }

    /// Scheduler handle for new one-shot registrations
    #[must_use]
    pub fn scheduler(&self) -> &'a Scheduler {
        self.scheduler
    }

    /// Attributes shared between dispatches
    #[must_use]
    pub fn attributes(&self) -> &'a Attributes {
        self.attributes
    }
}

/// Store view handed to handlers; remembers devices whose state changed
pub(crate) struct ChangeRecorder<'a> {
    inner: &'a dyn DeviceStore,
    changed: Mutex<Vec<Device>>,
}

impl<'a> ChangeRecorder<'a> {
    pub(crate) fn new(inner: &'a dyn DeviceStore) -> Self {
        Self {
            inner,
            changed: Mutex::new(Vec::new()),
        }
    }

    /// Changed devices in update order
    pub(crate) fn into_changes(self) -> Vec<Device> {
        self.changed.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceStore for ChangeRecorder<'_> {
    fn get_by_id(&self, id: &str) -> Result<Device, StoreError> {
        self.inner.get_by_id(id)
    }

    fn get_all(&self) -> Vec<Device> {
        self.inner.get_all()
    }

    fn update(&self, id: &str, device: Device) -> Result<Device, StoreError> {
        let before = self.inner.get_by_id(id).ok();
        let after = self.inner.update(id, device)?;
        if before.as_ref() != Some(&after) {
            self.changed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(after.clone());
        }
        Ok(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SeededRandom};
    use chrono::TimeZone;
    use device_store::{set_power, JsonDeviceStore};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_attributes_set_and_remove() {
        let attributes = Attributes::new();
        attributes.set("mode", Some(json!("away")));
        attributes.set("count", Some(json!(3)));

        assert_eq!(attributes.get_str("mode").as_deref(), Some("away"));
        assert_eq!(attributes.get_str("count").as_deref(), Some("3"));

        attributes.set("mode", None);
        assert_eq!(attributes.get("mode"), None);
        assert_eq!(attributes.remove("count"), Some(json!(3)));
        assert_eq!(attributes.get("count"), None);
    }

    #[test]
    fn test_calendar_and_daylight_accessors() {
        // 2024-06-21 is Midsummer Eve; 20:30 UTC is 22:30 at UTC+2
        let now = Utc.with_ymd_and_hms(2024, 6, 21, 20, 30, 0).unwrap();
        let clock = ManualClock::new(now, FixedOffset::east_opt(2 * 3600).unwrap());
        let scheduler = Scheduler::new(Arc::new(clock), Arc::new(SeededRandom::from_seed(1)));
        let store = JsonDeviceStore::in_memory([]);
        let attributes = Attributes::new();
        let holidays = HolidayCalendar::swedish();
        let stockholm = Coordinate::new(59.334591, 18.063240);
        let state = DaylightState::at(stockholm, now, FixedOffset::east_opt(2 * 3600).unwrap());

        let ctx = EventContext::new(&scheduler, &store, &attributes, Some(state), &holidays);
        assert_eq!((ctx.hour(), ctx.minute()), (22, 30));
        assert!(ctx.is_holiday());
        assert_eq!(ctx.coordinate(), Some(stockholm));
        assert_eq!(ctx.next_sunset(), Some(state.next_sunset));
        assert!(ctx.next_sunrise().unwrap() > now);

        let none = HolidayCalendar::none();
        let ctx = EventContext::new(&scheduler, &store, &attributes, None, &none);
        assert!(!ctx.is_holiday());
        assert_eq!(ctx.next_sunrise(), None);
        assert_eq!(ctx.coordinate(), None);
    }

    #[test]
    fn test_change_recorder_keeps_real_changes_only() {
        let store = JsonDeviceStore::in_memory([Device::new("1", "downstairs"), Device::new("2", "upstairs")]);
        let recorder = ChangeRecorder::new(&store);

        set_power(&recorder, "1", true).unwrap();
        set_power(&recorder, "2", false).unwrap();
        set_power(&recorder, "1", false).unwrap();
        assert!(set_power(&recorder, "9", true).is_err());

        let changes: Vec<(String, bool)> = recorder
            .into_changes()
            .into_iter()
            .map(|d| (d.id, d.on))
            .collect();
        assert_eq!(changes, vec![("1".to_string(), true), ("1".to_string(), false)]);
    }
}
