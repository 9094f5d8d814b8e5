//! Software timers (spec §4.9, component L9).
//!
//! Grounded directly on the teacher's `timer.rs` (`start_timer`/
//! `stop_timer`/`set_timer_period`/`timer_timeout_handler`'s
//! reschedule-before-invoking-the-callback ordering, which keeps a
//! periodic timer drift-free even if its callback runs long), re-pointed
//! from the teacher's `timeout.rs` (`Time32`, a wrapping 32-bit timestamp
//! with its own binary-heap-free sorted-list machinery) onto this crate's
//! [`crate::tick::DeadlineList`], since `Tick` here is already a
//! non-wrapping `u64` (see `tick.rs`'s module doc).
use core::cell::Cell;

use crate::list::{Links, Node};
use crate::tick::{self, Deadline, DeadlineList, Duration, Tick};
use crate::{klock, utils::panicking::abort_on_unwind};

pub struct TimerRole;

pub struct TimerCb {
    entry: fn(usize),
    arg: usize,
    active: Cell<bool>,
    /// `None` for a one-shot timer; `Some(period)` for one that
    /// automatically re-arms after firing.
    period: Cell<Option<Duration>>,
    deadline: Cell<Tick>,
    links: Links<TimerCb, TimerRole>,
}

impl Node<TimerRole> for TimerCb {
    fn links(&self) -> &Links<Self, TimerRole> {
        &self.links
    }
}

// Safety: every field is only touched under the kernel lock. Needed for
// `static TIMER: TimerCb = TimerCb::new(...)` declarations.
unsafe impl Sync for TimerCb {}

impl Deadline<TimerRole> for TimerCb {
    fn deadline(&self) -> Tick {
        self.deadline.get()
    }
}

static TIMERS: DeadlineList<TimerCb, TimerRole> = DeadlineList::new();

impl TimerCb {
    pub const fn new(entry: fn(usize), arg: usize) -> Self {
        Self {
            entry,
            arg,
            active: Cell::new(false),
            period: Cell::new(None),
            deadline: Cell::new(0),
            links: Links::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        let _lock = klock::lock_cpu();
        self.active.get()
    }

    fn unlink(&'static self) {
        if Node::<TimerRole>::links(self).is_linked() {
            TIMERS.remove(self);
        }
    }

    /// Arm the timer to fire once after `delay` ticks, replacing any
    /// pending firing. If a period was configured via
    /// [`TimerCb::set_period`], it continues to re-arm the timer after
    /// every firing, including this first one.
    pub fn start(&'static self, delay: Duration) {
        assert!(delay >= 0, "timer delay must not be negative");
        let _lock = klock::lock_cpu();
        self.unlink();
        self.deadline.set(tick::now().wrapping_add(delay as u64));
        TIMERS.insert(self);
        self.active.set(true);
    }

    /// Disarm the timer. Idempotent.
    pub fn stop(&'static self) {
        let _lock = klock::lock_cpu();
        self.unlink();
        self.active.set(false);
    }

    /// Configure (or clear, with `None`) the timer's auto-rearm period.
    /// Takes effect starting from the next firing.
    pub fn set_period(&self, period: Option<Duration>) {
        assert!(period.map_or(true, |p| p >= 0), "timer period must not be negative");
        let _lock = klock::lock_cpu();
        self.period.set(period);
    }
}

/// Called from the tick interrupt (spec §4.2/§4.9). Fires every timer
/// whose deadline has passed, re-arming periodic ones *before* invoking
/// their callback (so a slow callback does not push the next firing back
/// by its own runtime — spec §4.9's drift-free guarantee) and always with
/// the kernel lock released (callbacks may themselves start/stop timers
/// or otherwise take the kernel lock).
pub fn tick_hook() {
    loop {
        let lock = klock::lock_cpu();
        let now = tick::now();
        let Some(timer) = TIMERS.drain_expired(now).next() else {
            break;
        };
        if let Some(period) = timer.period.get() {
            let new_deadline = timer.deadline.get().wrapping_add(period as u64);
            timer.deadline.set(new_deadline);
            TIMERS.insert(timer);
        } else {
            timer.active.set(false);
        }
        drop(lock);

        abort_on_unwind(|| (timer.entry)(timer.arg));
    }
}

/// Drop every pending timer without firing it. Used by
/// [`crate::boot::test_init`]; see [`crate::sched::reset_for_test`] for why
/// this is necessary at all.
#[cfg(any(test, feature = "std"))]
pub fn reset_for_test() {
    let _lock = klock::lock_cpu();
    while TIMERS.drain_expired(Tick::MAX).next().is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_timer_is_inactive() {
        static TIMER: TimerCb = TimerCb::new(|_| {}, 0);
        assert!(!Node::<TimerRole>::links(&TIMER).is_linked());
    }
}
