//! Scheduler for named one-shot and recurring daily events

use crate::clock::{Clock, RandomSource};
use crate::dispatcher::Dispatcher;
use crate::error::SchedulingError;
use crate::model::{DailyRecurrence, Event, NamedEvent};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Notify};

/// Longest the timing loop sleeps before re-reading the clock
const DEFAULT_MAX_WAIT: std::time::Duration = std::time::Duration::from_secs(1);

/// Largest jitter bound a daily event accepts
pub const MAX_JITTER_MS: u64 = 24 * 60 * 60 * 1000;

/// Pending events ordered by fire time, ties broken by insertion order
#[derive(Default)]
struct PendingQueue {
    entries: BTreeMap<(DateTime<Utc>, u64), NamedEvent>,
    next_seq: u64,
}

impl PendingQueue {
    fn push(&mut self, event: NamedEvent) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert((event.scheduled_at, seq), event);
    }
}

/// Owns the pending queue and the timing loop that fires it
pub struct Scheduler {
    queue: Mutex<PendingQueue>,
    wakeup: Notify,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    max_wait: std::time::Duration,
}

impl Scheduler {
    /// Create a scheduler with an empty queue
    pub fn new(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            queue: Mutex::new(PendingQueue::default()),
            wakeup: Notify::new(),
            clock,
            random,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Cap how long the timing loop waits between clock reads
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: std::time::Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    #[must_use]
    pub fn random(&self) -> &dyn RandomSource {
        self.random.as_ref()
    }

    /// Fire `name` once, `delay_ms` milliseconds from now
    pub fn register_once(&self, delay_ms: u64, name: &str) -> Result<DateTime<Utc>, SchedulingError> {
        check_name(name)?;
        let fire_at = millis(delay_ms)
            .and_then(|delay| self.clock.now().checked_add_signed(delay))
            .ok_or(SchedulingError::DelayOutOfRange(delay_ms))?;
        self.enqueue(NamedEvent::new(name, fire_at, None));
        tracing::debug!("Added event '{}' to run at {}", name, fire_at);
        Ok(fire_at)
    }

    /// Fire `name` at the next local `hour:00` strictly after now, plus a
    /// random offset in `[0, jitter_bound_ms)`, and again every day after.
    ///
    /// Bounds above [`MAX_JITTER_MS`] are rejected so that every later
    /// re-arm is guaranteed to succeed.
    pub fn register_once_tomorrow(
        &self,
        hour: u32,
        jitter_bound_ms: u64,
        name: &str,
    ) -> Result<DateTime<Utc>, SchedulingError> {
        check_name(name)?;
        if jitter_bound_ms > MAX_JITTER_MS {
            return Err(SchedulingError::DelayOutOfRange(jitter_bound_ms));
        }
        let recurrence = DailyRecurrence {
            hour,
            jitter_bound_ms,
        };
        let fire_at = self.daily_fire_time(recurrence)?;
        self.enqueue(NamedEvent::new(name, fire_at, Some(recurrence)));
        tracing::debug!("Added daily event '{}' to run at {}", name, fire_at);
        Ok(fire_at)
    }

    /// Snapshot of pending events in fire order
    #[must_use]
    pub fn pending(&self) -> Vec<NamedEvent> {
        self.lock_queue().entries.values().cloned().collect()
    }

    /// Number of pending entries with the given name
    #[must_use]
    pub fn pending_named(&self, name: &str) -> usize {
        self.lock_queue()
            .entries
            .values()
            .filter(|event| event.name == name)
            .count()
    }

    /// Number of pending entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_queue().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire time of the next pending entry
    #[must_use]
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.lock_queue()
            .entries
            .first_key_value()
            .map(|((at, _), _)| *at)
    }

    /// Fire every entry that is due, in fire order, and return how many fired.
    ///
    /// Each entry is removed (and its successor enqueued if recurring) before
    /// it is dispatched. Entries added while the pass runs wait for the next
    /// pass.
    pub fn fire_elapsed(&self, dispatcher: &Dispatcher) -> usize {
        let now = self.clock.now();
        let batch_end = self.lock_queue().next_seq;
        let mut fired = 0;

        while let Some(event) = self.take_due(now, batch_end) {
            tracing::debug!("Firing event '{}' scheduled for {}", event.name, event.scheduled_at);
            dispatcher.dispatch(&Event::Named(event));
            fired += 1;
        }

        if fired > 1 {
            tracing::info!("Caught up on {} elapsed events", fired);
        }
        fired
    }

    /// Timing loop: fires due events until `shutdown` turns true.
    ///
    /// Pending entries are abandoned, not fired, on shutdown.
    pub async fn run(self: Arc<Self>, dispatcher: Arc<Dispatcher>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Scheduler started with {} pending events", self.len());

        loop {
            if *shutdown.borrow() {
                break;
            }

            let scheduler = self.clone();
            let target = dispatcher.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || scheduler.fire_elapsed(&target)).await {
                tracing::error!("Firing elapsed events failed: {}", e);
            }

            let wait = self
                .time_until_next()
                .map_or(self.max_wait, |until| until.min(self.max_wait));

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = self.wakeup.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped, abandoning {} pending events", self.len());
    }

    fn enqueue(&self, event: NamedEvent) {
        self.lock_queue().push(event);
        self.wakeup.notify_one();
    }

    /// Pop the earliest due entry and, if it recurs, enqueue its successor
    /// under the same lock.
    fn take_due(&self, now: DateTime<Utc>, batch_end: u64) -> Option<NamedEvent> {
        let mut queue = self.lock_queue();
        let (&key, _) = queue.entries.first_key_value()?;
        let (fire_at, seq) = key;
        if fire_at > now || seq >= batch_end {
            return None;
        }
        let event = queue.entries.remove(&key)?;

        if let Some(recurrence) = event.recurrence {
            match self.daily_fire_time(recurrence) {
                Ok(next) => {
                    tracing::debug!("Re-armed daily event '{}' for {}", event.name, next);
                    queue.push(NamedEvent::new(event.name.clone(), next, Some(recurrence)));
                }
                Err(e) => {
                    tracing::warn!("Failed to re-arm event '{}': {}", event.name, e);
                }
            }
        }

        Some(event)
    }

    fn daily_fire_time(&self, recurrence: DailyRecurrence) -> Result<DateTime<Utc>, SchedulingError> {
        let base = next_daily_occurrence(self.clock.as_ref(), recurrence.hour)?;
        let jitter = self.random.next_below(recurrence.jitter_bound_ms);
        millis(jitter)
            .and_then(|jitter| base.checked_add_signed(jitter))
            .ok_or(SchedulingError::DelayOutOfRange(recurrence.jitter_bound_ms))
    }

    fn time_until_next(&self) -> Option<std::time::Duration> {
        let next = self.next_fire_time()?;
        Some((next - self.clock.now()).to_std().unwrap_or(std::time::Duration::ZERO))
    }

    fn lock_queue(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Next local `hour:00` strictly after the clock's current instant.
///
/// Today's occurrence if it is still ahead, otherwise tomorrow's. The local
/// wall time is resolved with the offset in effect at that moment, so a
/// daylight saving change overnight still lands on `hour:00`.
pub fn next_daily_occurrence(clock: &dyn Clock, hour: u32) -> Result<DateTime<Utc>, SchedulingError> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).ok_or(SchedulingError::InvalidHour(hour))?;

    let now = clock.now();
    let offset_now = clock.local_offset(now);
    let local_now = now.with_timezone(&offset_now).naive_local();

    let mut target = local_now.date().and_time(time);
    if target <= local_now {
        target += Duration::days(1);
    }

    let guess = (target - Duration::seconds(i64::from(offset_now.local_minus_utc()))).and_utc();
    let offset = clock.local_offset(guess).local_minus_utc();
    Ok((target - Duration::seconds(i64::from(offset))).and_utc())
}

fn check_name(name: &str) -> Result<(), SchedulingError> {
    if name.is_empty() {
        return Err(SchedulingError::EmptyName);
    }
    Ok(())
}

fn millis(ms: u64) -> Option<Duration> {
    i64::try_from(ms).ok().and_then(Duration::try_milliseconds)
}
