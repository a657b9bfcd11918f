//! Data models for the event engine

use chrono::{DateTime, Utc};
use device_store::Device;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Categories of events fired by external conditions rather than the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// The engine started
    Startup,
    /// The engine stopped
    Shutdown,
    /// The sun rose
    Sunrise,
    /// The sun set
    Sunset,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Sunrise => "sunrise",
            Self::Sunset => "sunset",
        };
        f.write_str(name)
    }
}

/// Daily recurrence of a named event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecurrence {
    /// Local hour of day (0-23)
    pub hour: u32,
    /// Exclusive upper bound of the random offset added to `hour:00`
    pub jitter_bound_ms: u64,
}

/// A one-shot event fired by the scheduler at an absolute time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEvent {
    /// Instance id (dispatch matches on `name`, not on this)
    pub id: Uuid,
    /// Event name handlers are registered under
    pub name: String,
    /// When the event fires
    pub scheduled_at: DateTime<Utc>,
    /// Set when the event re-arms itself for the next day after firing
    #[serde(default)]
    pub recurrence: Option<DailyRecurrence>,
}

impl NamedEvent {
    /// Create a new event instance
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        recurrence: Option<DailyRecurrence>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            scheduled_at,
            recurrence,
        }
    }

    /// Whether firing this event produces a successor for the next day
    #[must_use]
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}

/// An event delivered to handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Scheduled one-shot event
    Named(NamedEvent),
    /// Externally triggered category event
    Category { category: EventCategory },
    /// A device's state was changed through the store
    DeviceChanged { device: Device },
}

impl Event {
    /// Create a category event
    #[must_use]
    pub fn category(category: EventCategory) -> Self {
        Self::Category { category }
    }

    /// Name of a one-shot event, `None` for category events
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(event) => Some(&event.name),
            Self::Category { .. } | Self::DeviceChanged { .. } => None,
        }
    }

    /// The selector handlers must be registered under to receive this event
    #[must_use]
    pub fn selector(&self) -> Selector {
        match self {
            Self::Named(event) => Selector::Name(event.name.clone()),
            Self::Category { category } => Selector::Category(*category),
            Self::DeviceChanged { .. } => Selector::DeviceChanged,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(event) => write!(f, "'{}'", event.name),
            Self::Category { category } => write!(f, "<{category}>"),
            Self::DeviceChanged { device } => write!(f, "<device_changed {}>", device.id),
        }
    }
}

/// What a handler is registered against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Exact name of a one-shot event
    Name(String),
    /// Category of an externally triggered event
    Category(EventCategory),
    /// Any device state change
    DeviceChanged,
}

impl Selector {
    /// Select one-shot events by exact name
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "'{name}'"),
            Self::Category(category) => write!(f, "<{category}>"),
            Self::DeviceChanged => f.write_str("<device_changed>"),
        }
    }
}
