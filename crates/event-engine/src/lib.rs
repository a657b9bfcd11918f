//! Event scheduling and dispatch engine
//!
//! Fires named one-shot events at times of day (with random jitter and
//! automatic daily re-arming), accepts category triggers such as sunset
//! from external feeds, and dispatches every fired event to the handlers
//! registered for it.

pub mod clock;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod feed;
pub mod model;
pub mod registry;
pub mod scheduler;

pub use clock::{Clock, ManualClock, RandomSource, SeededRandom, SystemClock};
pub use context::{Attributes, EventContext};
pub use dispatcher::{DispatchOutcome, Dispatcher, EngineEvent};
pub use engine::EventEngine;
pub use error::{HandlerError, HandlerFailure, SchedulingError};
pub use feed::{DaylightFeed, DaylightState, DAYLIGHT_ATTRIBUTE};
pub use model::*;
pub use registry::{EventRegistry, Handler, HandlerId};
pub use scheduler::{Scheduler, MAX_JITTER_MS};
