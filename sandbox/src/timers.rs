//! Deferred wake-ups requested by the guest.
//!
//! `scheduleTimeoutEvent` registers a deadline and hands back an id; the
//! guest clears the id once it has handled the wake-up. The registry is
//! drained by the runtime's event loop in deadline order.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Slack added to every delay so a timeout never fires early.
const DEADLINE_SLACK: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct TimerRegistry {
    next_id: i32,
    scheduled: BTreeMap<i32, Instant>,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self {
            next_id: 1,
            scheduled: BTreeMap::new(),
        }
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timeout `delay_ms` from `now`. Negative delays fire
    /// immediately.
    pub fn schedule(&mut self, now: Instant, delay_ms: i64) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        self.scheduled.insert(id, now + delay + DEADLINE_SLACK);
        id
    }

    /// Cancel `id`. Returns whether it was registered.
    pub fn clear(&mut self, id: i32) -> bool {
        self.scheduled.remove(&id).is_some()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.scheduled.contains_key(&id)
    }

    /// The earliest deadline, ties broken by id.
    pub fn next_due(&self) -> Option<(i32, Instant)> {
        self.scheduled
            .iter()
            .min_by_key(|(id, deadline)| (**deadline, **id))
            .map(|(id, deadline)| (*id, *deadline))
    }

    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }

    pub fn clear_all(&mut self) {
        self.scheduled.clear();
    }
}
