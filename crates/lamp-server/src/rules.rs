//! Household lamp rules wired at startup

use device_store::set_power;
use event_engine::{
    EventCategory, EventContext, EventEngine, Handler, HandlerError, SchedulingError, Selector,
};

pub const LAMP_DOWNSTAIRS: &str = "1";
pub const LAMP_UPSTAIRS: &str = "2";

pub const TURN_OFF_ALL_EVENING: &str = "turnOffAllLampsEvening";
pub const TURN_OFF_ALL_MORNING: &str = "turnOffAllLampsMorning";
pub const TURN_ON_DOWNSTAIRS: &str = "turnOnLampDownstairs";
pub const TURN_OFF_DOWNSTAIRS: &str = "turnOffLampDownstairs";
pub const TURN_ON_UPSTAIRS: &str = "turnOnLampUpstairs";
pub const TURN_OFF_UPSTAIRS: &str = "turnOffLampUpstairs";

/// Random offset added to the nightly and morning shutoff
const SHUTOFF_JITTER_MS: u64 = 30 * 60 * 1000;
/// Lamps come on within this window after sunset
const SUNSET_ON_WINDOW_MS: u64 = 15 * 60 * 1000;
/// Lamps go off this long after sunset, plus up to `SUNSET_OFF_JITTER_MS`
const SUNSET_OFF_DELAY_MS: u64 = 3 * 60 * 60 * 1000;
const SUNSET_OFF_JITTER_MS: u64 = 2 * 60 * 1000;

/// Register the rule handlers and arm the daily shutoff events
pub fn install(engine: &EventEngine) -> Result<(), SchedulingError> {
    let registry = engine.registry();

    for name in [TURN_OFF_ALL_EVENING, TURN_OFF_ALL_MORNING] {
        registry.register(
            Selector::name(name),
            Handler::new("turn_off_all_lamps", |ctx, _| turn_off_all_lamps(ctx)),
        );
    }

    let lamp_events = [
        (TURN_ON_DOWNSTAIRS, LAMP_DOWNSTAIRS, true),
        (TURN_OFF_DOWNSTAIRS, LAMP_DOWNSTAIRS, false),
        (TURN_ON_UPSTAIRS, LAMP_UPSTAIRS, true),
        (TURN_OFF_UPSTAIRS, LAMP_UPSTAIRS, false),
    ];
    for (name, lamp, on) in lamp_events {
        registry.register(
            Selector::name(name),
            Handler::new(name, move |ctx, _| {
                set_power(ctx.store(), lamp, on)?;
                Ok(())
            }),
        );
    }

    registry.register(
        Selector::Category(EventCategory::Sunset),
        Handler::new("turn_on_lamps_evening", |ctx, _| turn_on_lamps_evening(ctx)),
    );

    let scheduler = engine.scheduler();
    scheduler.register_once_tomorrow(0, SHUTOFF_JITTER_MS, TURN_OFF_ALL_EVENING)?;
    scheduler.register_once_tomorrow(8, SHUTOFF_JITTER_MS, TURN_OFF_ALL_MORNING)?;

    tracing::info!("Installed lamp rules");
    Ok(())
}

fn turn_off_all_lamps(ctx: &EventContext<'_>) -> Result<(), HandlerError> {
    for lamp in ctx.store().get_all() {
        set_power(ctx.store(), &lamp.id, false)?;
    }
    Ok(())
}

/// Stagger the lamps on after sunset and off three hours later
fn turn_on_lamps_evening(ctx: &EventContext<'_>) -> Result<(), HandlerError> {
    let scheduler = ctx.scheduler();
    for name in [TURN_ON_DOWNSTAIRS, TURN_ON_UPSTAIRS] {
        scheduler.register_once(ctx.random_below(SUNSET_ON_WINDOW_MS), name)?;
    }
    for name in [TURN_OFF_DOWNSTAIRS, TURN_OFF_UPSTAIRS] {
        let delay = SUNSET_OFF_DELAY_MS + ctx.random_below(SUNSET_OFF_JITTER_MS);
        scheduler.register_once(delay, name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use device_store::{Device, DeviceStore, JsonDeviceStore};
    use event_engine::{Clock, Event, ManualClock, SeededRandom};
    use std::sync::Arc;

    struct Home {
        clock: Arc<ManualClock>,
        store: Arc<JsonDeviceStore>,
        engine: EventEngine,
    }

    fn home() -> Home {
        let clock = Arc::new(ManualClock::utc(
            Utc.with_ymd_and_hms(2024, 10, 17, 15, 30, 0).unwrap(),
        ));
        let store = Arc::new(JsonDeviceStore::in_memory([
            Device::new(LAMP_DOWNSTAIRS, "Downstairs"),
            Device::new(LAMP_UPSTAIRS, "Upstairs"),
            Device::new("3", "Porch"),
        ]));
        let engine = EventEngine::new(
            store.clone(),
            clock.clone(),
            Arc::new(SeededRandom::from_seed(7)),
        );
        install(&engine).unwrap();
        Home {
            clock,
            store,
            engine,
        }
    }

    fn is_on(store: &JsonDeviceStore, id: &str) -> bool {
        store.get_by_id(id).unwrap().on
    }

    #[test]
    fn test_install_arms_daily_shutoffs() {
        let home = home();
        let scheduler = home.engine.scheduler();
        assert_eq!(scheduler.len(), 2);

        let pending = scheduler.pending();
        assert!(pending.iter().all(|event| event.is_recurring()));

        let evening = pending
            .iter()
            .find(|event| event.name == TURN_OFF_ALL_EVENING)
            .unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 10, 18, 0, 0, 0).unwrap();
        assert!(evening.scheduled_at >= midnight);
        assert!(evening.scheduled_at < midnight + Duration::minutes(30));
    }

    #[test]
    fn test_per_lamp_events() {
        let home = home();
        home.engine.trigger_named(TURN_ON_UPSTAIRS);
        assert!(is_on(&home.store, LAMP_UPSTAIRS));
        assert!(!is_on(&home.store, LAMP_DOWNSTAIRS));

        home.engine.trigger_named(TURN_OFF_UPSTAIRS);
        assert!(!is_on(&home.store, LAMP_UPSTAIRS));
    }

    #[test]
    fn test_turn_off_all_lamps() {
        let home = home();
        for id in [LAMP_DOWNSTAIRS, LAMP_UPSTAIRS, "3"] {
            set_power(home.store.as_ref(), id, true).unwrap();
        }

        let outcome = home.engine.trigger_named(TURN_OFF_ALL_MORNING);
        assert!(outcome.is_success());
        assert!(home.store.get_all().iter().all(|lamp| !lamp.on));
    }

    #[test]
    fn test_sunset_staggers_lamps() {
        let home = home();
        let sunset = home.clock.now();
        home.engine.trigger(&Event::category(EventCategory::Sunset));

        let scheduler = home.engine.scheduler();
        for name in [TURN_ON_DOWNSTAIRS, TURN_ON_UPSTAIRS, TURN_OFF_DOWNSTAIRS, TURN_OFF_UPSTAIRS] {
            assert_eq!(scheduler.pending_named(name), 1, "{name}");
        }
        for event in scheduler.pending() {
            let delay = event.scheduled_at - sunset;
            if event.name.starts_with("turnOnLamp") {
                assert!(delay < Duration::minutes(15));
            } else if event.name.starts_with("turnOffLamp") {
                assert!(delay >= Duration::hours(3));
                assert!(delay < Duration::hours(3) + Duration::minutes(2));
            }
        }

        let dispatcher = home.engine.dispatcher();
        home.clock.advance(Duration::minutes(15));
        assert_eq!(scheduler.fire_elapsed(dispatcher), 2);
        assert!(is_on(&home.store, LAMP_DOWNSTAIRS));
        assert!(is_on(&home.store, LAMP_UPSTAIRS));
        assert!(!is_on(&home.store, "3"));

        home.clock.advance(Duration::hours(3));
        assert_eq!(scheduler.fire_elapsed(dispatcher), 2);
        assert!(!is_on(&home.store, LAMP_DOWNSTAIRS));
        assert!(!is_on(&home.store, LAMP_UPSTAIRS));
    }

    #[test]
    fn test_missing_lamp_is_reported() {
        let clock = Arc::new(ManualClock::utc(Utc.with_ymd_and_hms(2024, 10, 17, 15, 30, 0).unwrap()));
        let engine = EventEngine::new(
            Arc::new(JsonDeviceStore::in_memory([])),
            clock,
            Arc::new(SeededRandom::from_seed(7)),
        );
        install(&engine).unwrap();

        let outcome = engine.trigger_named(TURN_ON_DOWNSTAIRS);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].handler, TURN_ON_DOWNSTAIRS);
    }
}
