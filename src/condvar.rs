//! Condition variables (spec §4.6, component L6).
//!
//! The teacher has no direct equivalent (r3 omits condition variables from
//! its kernel surface); this module is built from [`crate::wait::WaitQueue`]
//! and the [`crate::mutex::MutexCb`] entry points already written, following
//! the standard POSIX `pthread_cond_wait` contract: the caller must hold
//! `mutex`, which is atomically released for the duration of the wait and
//! reacquired before returning, including when returning due to a timeout
//! or signal interruption.
use crate::error::{ResultCode, WaitError, WaitTimeoutError};
use crate::klock;
use crate::mutex::MutexCb;
use crate::sched;
use crate::task::ThreadState;
use crate::tick::{self, Duration};
use crate::wait::{QueueOrder, WaitQueue};

pub struct CondVar {
    wait_queue: WaitQueue,
}

// Safety: `wait_queue` is only touched under the kernel lock. Needed for
// `static CV: CondVar = CondVar::new()` declarations.
unsafe impl Sync for CondVar {}

impl CondVar {
    pub const fn new() -> Self {
        Self { wait_queue: WaitQueue::new(QueueOrder::Priority) }
    }

    /// Atomically unlock `mutex` and block until woken by
    /// [`CondVar::notify_one`]/[`CondVar::notify_all`], then reacquire
    /// `mutex` before returning. The caller must already hold `mutex`.
    pub fn wait(&'static self, mutex: &'static MutexCb) -> Result<(), WaitError> {
        self.wait_timeout(mutex, tick::INFINITE).map_err(crate::error::expect_not_timed_out)
    }

    /// As [`CondVar::wait`], but blocks for at most `timeout` ticks.
    /// `mutex` is reacquired before returning even when the wait times out
    /// or is interrupted, matching POSIX `pthread_cond_timedwait`.
    pub fn wait_timeout(
        &'static self,
        mutex: &'static MutexCb,
        timeout: Duration,
    ) -> Result<(), WaitTimeoutError> {
        if timeout < 0 {
            crate::error::fatal("condvar wait given a negative duration");
        }
        mutex
            .unlock()
            .unwrap_or_else(|_| crate::error::fatal("condvar wait: caller does not own the mutex"));

        let lock = klock::lock_cpu();
        let current = sched::current_or_fatal(&lock);
        let deadline = (timeout != tick::INFINITE).then(|| tick::now().wrapping_add(timeout as u64));
        let result = self.wait_queue.block(
            lock,
            current,
            ThreadState::BlockedOnConditionVariable,
            deadline,
        );

        mutex
            .lock()
            .unwrap_or_else(|_| crate::error::fatal("condvar wait: failed to reacquire mutex"));

        match result {
            Ok(()) => Ok(()),
            Err(ResultCode::TimedOut) => Err(WaitTimeoutError::TimedOut),
            Err(ResultCode::Interrupted) => Err(WaitTimeoutError::Interrupted),
            Err(_) => crate::error::fatal("unexpected condvar wait result"),
        }
    }

    /// Wake one blocked waiter, if any.
    pub fn notify_one(&self) {
        let mut lock = klock::lock_cpu();
        let woke = self.wait_queue.wake_one(&mut lock).is_some();
        if woke {
            sched::dispatch(lock);
        }
    }

    /// Wake every blocked waiter.
    pub fn notify_all(&self) {
        let mut lock = klock::lock_cpu();
        let was_empty = self.wait_queue.is_empty();
        self.wait_queue.wake_all(&mut lock);
        if !was_empty {
            sched::dispatch(lock);
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
