//! Counting semaphores (spec §4.5, component L5).
//!
//! Grounded almost directly on the teacher's `semaphore.rs`
//! (`poll_core`/`wait_one`/`signal`'s "wake a waiter or bank the permit"
//! loop), adapted from the generic `Traits`-parameterized free functions
//! operating on a `SemaphoreId` into inherent methods on a concrete
//! `SemaphoreCb` value.
use crate::error::{PollError, PostError, WaitError, WaitTimeoutError};
use crate::klock;
use crate::sched;
use crate::task::ThreadState;
use crate::tick::{self, Duration};
use crate::wait::{QueueOrder, WaitQueue};

pub struct SemaphoreCb {
    value: core::cell::Cell<u32>,
    max_value: u32,
    wait_queue: WaitQueue,
}

// Safety: `value` is only touched under the kernel lock. Needed for
// `static SEM: SemaphoreCb = SemaphoreCb::new(...)` declarations.
unsafe impl Sync for SemaphoreCb {}

impl SemaphoreCb {
    pub const fn new(initial_value: u32, max_value: u32) -> Self {
        Self {
            value: core::cell::Cell::new(initial_value),
            max_value,
            wait_queue: WaitQueue::new(QueueOrder::Priority),
        }
    }

    pub fn value(&self) -> u32 {
        let _lock = klock::lock_cpu();
        self.value.get()
    }

    fn poll_core(&self) -> bool {
        let v = self.value.get();
        if v > 0 {
            self.value.set(v - 1);
            true
        } else {
            false
        }
    }

    /// Decrement the semaphore without blocking, or fail with `Busy`.
    pub fn try_wait(&'static self) -> Result<(), PollError> {
        let _lock = klock::lock_cpu();
        if self.poll_core() {
            Ok(())
        } else {
            Err(PollError::Busy)
        }
    }

    /// Decrement the semaphore, blocking indefinitely if its value is 0.
    pub fn wait(&'static self) -> Result<(), WaitError> {
        self.wait_timeout(tick::INFINITE).map_err(crate::error::expect_not_timed_out)
    }

    /// Decrement the semaphore, blocking for at most `timeout` ticks.
    pub fn wait_timeout(&'static self, timeout: Duration) -> Result<(), WaitTimeoutError> {
        let lock = klock::lock_cpu();
        if self.poll_core() {
            return Ok(());
        }
        let current = sched::current_or_fatal(&lock);
        let deadline = (timeout != tick::INFINITE).then(|| tick::now().wrapping_add(timeout as u64));
        self.wait_queue
            .block(lock, current, ThreadState::BlockedOnSemaphore, deadline)
            .map_err(|e| match e {
                crate::error::ResultCode::TimedOut => WaitTimeoutError::TimedOut,
                crate::error::ResultCode::Interrupted => WaitTimeoutError::Interrupted,
                _ => crate::error::fatal("unexpected semaphore wait result"),
            })
    }

    /// Increment the semaphore's value by `count`, waking blocked waiters
    /// one at a time as long as permits remain, and banking the rest.
    /// Fails with `WouldOverflow` if the increment would exceed the
    /// configured maximum, leaving the semaphore unmodified.
    pub fn post(&'static self, count: u32) -> Result<(), PostError> {
        let mut lock = klock::lock_cpu();
        let value = self.value.get();
        if self.max_value - value < count {
            return Err(PostError::WouldOverflow);
        }

        let mut remaining = count;
        let mut woke_any = false;
        while remaining > 0 {
            if self.wait_queue.wake_one(&mut lock).is_some() {
                remaining -= 1;
                woke_any = true;
            } else {
                self.value.set(value + remaining);
                break;
            }
        }

        if woke_any {
            sched::dispatch(lock);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_wait_on_empty_semaphore_is_busy() {
        static SEM: SemaphoreCb = SemaphoreCb::new(0, 1);
        crate::testport::reset();
        crate::boot::test_init(&[]);
        assert_eq!(SEM.try_wait(), Err(PollError::Busy));
    }
}
