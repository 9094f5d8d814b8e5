//! The monotonic tick clock (spec §4.2, component L1).
//!
//! Grounded on the teacher's `timeout.rs`, whose `Time32` type and
//! frontier/headroom-zone bookkeeping exist to make a *wrapping* 32-bit
//! timestamp comparable safely. Spec §3 defines `Tick` as a plain `u64`,
//! so none of that machinery is needed: at 1 kHz a `u64` tick counter does
//! not wrap within any plausible uptime (roughly 584 million years), so
//! ordinary `<`/`<=` on two `Tick` values is always correct. What survives
//! from the teacher's design is the core technique of a single sorted list
//! of pending deadlines with O(1) "is anything due" checks, generalized
//! here ([`DeadlineList`]) so both the scheduler's sleep/timeout queue
//! (`task.rs`) and the software timer engine (`timer.rs`) can reuse it
//! instead of each maintaining their own sorted structure.
use crate::klock::{self, CpuLockCell};
use crate::list::{self, List, Node};

/// A tick count. Wraps at `u64::MAX`, which in practice never happens.
pub type Tick = u64;

/// A relative duration, in ticks. Negative durations are rejected by every
/// operation that accepts one (`ResultCode::InvalidArgument`), matching
/// spec §3 — `Duration` is signed only so `Tick` arithmetic
/// (`deadline - now`) can be expressed without a separate signed/unsigned
/// conversion at every call site.
pub type Duration = i64;

/// A duration meaning "block indefinitely" in APIs that otherwise take a
/// bounded timeout.
pub const INFINITE: Duration = Duration::MAX;

static TICK: CpuLockCell<Tick> = CpuLockCell::new(0);

/// The current tick count.
pub fn now() -> Tick {
    let lock = klock::lock_cpu();
    *TICK.read(&*lock)
}

/// Advance the tick count by one. Called by the port's tick source
/// interrupt handler. Returns the new tick count; the caller (normally
/// `task::tick_hook`, `timer::tick_hook`) is responsible for acting on
/// expired deadlines — `tick::on_tick` only advances the clock itself so
/// that `now()` and deadline comparisons stay consistent even if a caller
/// queries `now()` from within a tick-hook callback.
pub fn on_tick() -> Tick {
    let mut lock = klock::lock_cpu();
    let t = TICK.write(&mut *lock);
    *t = t.wrapping_add(1);
    *t
}

/// Implemented by nodes that can be kept in a [`DeadlineList`]: anything
/// with an absolute wake-up tick.
pub trait Deadline<Role = ()>: Node<Role> {
    fn deadline(&self) -> Tick;
}

/// A list of `&'static T` kept sorted ascending by [`Deadline::deadline`],
/// ties broken FIFO (spec §3's sorted-queue invariant). Earliest deadline
/// is always at the front, giving O(1) "what's the next deadline" and
/// O(1) amortized expiry draining.
pub struct DeadlineList<T: Deadline<Role>, Role = ()>(List<T, Role>);

impl<T: Deadline<Role>, Role> DeadlineList<T, Role> {
    pub const fn new() -> Self {
        Self(List::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&self, node: &'static T) {
        self.0.insert_sorted_by(node, |a, b| a.deadline() < b.deadline());
    }

    pub fn remove(&self, node: &'static T) {
        self.0.remove(node);
    }

    /// The earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Tick> {
        self.0.front().map(|n| n.deadline())
    }

    /// Remove and return every node whose deadline is `<= now`, in
    /// deadline (then FIFO) order.
    pub fn drain_expired(&self, now: Tick) -> impl Iterator<Item = &'static T> + '_ {
        core::iter::from_fn(move || match self.0.front() {
            Some(n) if n.deadline() <= now => {
                self.0.remove(n);
                Some(n)
            }
            _ => None,
        })
    }
}

impl<T: Deadline<Role>, Role> Default for DeadlineList<T, Role> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reset the tick count to zero. Used by [`crate::boot::test_init`]; see
/// [`crate::sched::reset_for_test`] for why this is necessary at all — left
/// un-reset, a later test in the same binary would start from whatever tick
/// count an earlier test left behind instead of 0.
#[cfg(any(test, feature = "std"))]
pub fn reset_for_test() {
    let mut lock = klock::lock_cpu();
    *TICK.write(&mut *lock) = 0;
}

pub use list::Links as DeadlineLinks;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_monotonic() {
        let a = now();
        on_tick();
        let b = now();
        assert_eq!(b, a + 1);
    }
}
