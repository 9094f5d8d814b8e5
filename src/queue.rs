//! Bounded FIFO and priority message queues (spec §4.7, component L7).
//!
//! Grounded on `original_source/include/distortos/synchronization/
//! MessageQueueBase.hpp` and `include/estd/StaticCircularBuffer.hpp`: a
//! fixed-capacity circular buffer of fixed-size elements, with push/pop
//! sides each guarded by their own [`crate::wait::WaitQueue`] (pushers
//! block on "full", poppers block on "empty") the way `MessageQueueBase`
//! pairs a `pushSemaphore`/`popSemaphore` with its buffer. Priority
//! ordering of queued elements (spec §4.7's "message queue", as opposed to
//! the plain FIFO queue) is layered on top as an insertion-sorted
//! `ArrayVec` rather than the circular buffer, since a true ring buffer
//! cannot keep its contents sorted without shifting; capacity is bounded
//! either way, so the extra move cost on `push` is acceptable.
use core::cell::RefCell;

use arrayvec::ArrayVec;

use crate::error::{PushTimeoutError, ResultCode, WaitError, WaitTimeoutError};
use crate::klock;
use crate::sched;
use crate::task::ThreadState;
use crate::tick::{self, Duration};
use crate::wait::{QueueOrder, WaitQueue};

/// A FIFO queue of `T`, fixed at capacity `N`, with blocking bounded
/// push/pop (spec §4.7's plain queue).
pub struct Queue<T, const N: usize> {
    buf: RefCell<ArrayVec<T, N>>,
    not_full: WaitQueue,
    not_empty: WaitQueue,
}

impl<T, const N: usize> Queue<T, N> {
    pub const fn new() -> Self {
        Self {
            buf: RefCell::new(ArrayVec::new_const()),
            not_full: WaitQueue::new(QueueOrder::Priority),
            not_empty: WaitQueue::new(QueueOrder::Priority),
        }
    }

    pub fn len(&self) -> usize {
        let _lock = klock::lock_cpu();
        self.buf.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Push `item` without blocking, or fail with `Busy` if full.
    pub fn try_push(&'static self, item: T) -> Result<(), (T, crate::error::PollError)> {
        let mut lock = klock::lock_cpu();
        let mut buf = self.buf.borrow_mut();
        if buf.is_full() {
            drop(buf);
            return Err((item, crate::error::PollError::Busy));
        }
        buf.push(item);
        drop(buf);
        if self.not_empty.wake_one(&mut lock).is_some() {
            sched::dispatch(lock);
        }
        Ok(())
    }

    /// Push `item`, blocking indefinitely while the queue is full.
    pub fn push(&'static self, item: T) -> Result<(), (T, WaitError)> {
        match self.push_timeout(item, tick::INFINITE) {
            Ok(()) => Ok(()),
            Err((item, PushTimeoutError::Interrupted)) => Err((item, WaitError::Interrupted)),
            Err((_, PushTimeoutError::TimedOut)) => {
                crate::error::fatal("infinite queue push reported a timeout")
            }
            Err((_, PushTimeoutError::WouldOverflow)) => unreachable!("blocking push never overflows"),
        }
    }

    /// Push `item`, blocking for at most `timeout` ticks while full.
    pub fn push_timeout(&'static self, item: T, timeout: Duration) -> Result<(), (T, PushTimeoutError)> {
        let lock = klock::lock_cpu();
        if !self.buf.borrow().is_full() {
            self.buf.borrow_mut().push(item);
            drop(lock);
            self.wake_one_popper();
            return Ok(());
        }
        let current = sched::current_or_fatal(&lock);
        let deadline = (timeout != tick::INFINITE).then(|| tick::now().wrapping_add(timeout as u64));
        match self.not_full.block(lock, current, ThreadState::BlockedOnFifoQueuePush, deadline) {
            Ok(()) => {
                // We were woken because a slot opened and reserved for
                // us; push now completes without blocking again.
                let _lock = klock::lock_cpu();
                self.buf.borrow_mut().push(item);
                Ok(())
            }
            Err(ResultCode::TimedOut) => Err((item, PushTimeoutError::TimedOut)),
            Err(ResultCode::Interrupted) => Err((item, PushTimeoutError::Interrupted)),
            Err(_) => crate::error::fatal("unexpected queue push wait result"),
        }
    }

    fn wake_one_popper(&self) {
        let mut lock = klock::lock_cpu();
        if self.not_empty.wake_one(&mut lock).is_some() {
            sched::dispatch(lock);
        }
    }

    /// Pop the oldest item without blocking, or fail with `Busy` if empty.
    pub fn try_pop(&'static self) -> Result<T, crate::error::PollError> {
        let mut lock = klock::lock_cpu();
        let mut buf = self.buf.borrow_mut();
        if buf.is_empty() {
            return Err(crate::error::PollError::Busy);
        }
        let item = buf.remove(0);
        drop(buf);
        if self.not_full.wake_one(&mut lock).is_some() {
            sched::dispatch(lock);
        }
        Ok(item)
    }

    /// Pop the oldest item, blocking indefinitely while empty.
    pub fn pop(&'static self) -> Result<T, WaitError> {
        self.pop_timeout(tick::INFINITE).map_err(crate::error::expect_not_timed_out)
    }

    /// Pop the oldest item, blocking for at most `timeout` ticks while
    /// empty.
    pub fn pop_timeout(&'static self, timeout: Duration) -> Result<T, WaitTimeoutError> {
        let lock = klock::lock_cpu();
        if !self.buf.borrow().is_empty() {
            let item = self.buf.borrow_mut().remove(0);
            drop(lock);
            self.wake_one_pusher();
            return Ok(item);
        }
        let current = sched::current_or_fatal(&lock);
        let deadline = (timeout != tick::INFINITE).then(|| tick::now().wrapping_add(timeout as u64));
        match self.not_empty.block(lock, current, ThreadState::BlockedOnFifoQueuePop, deadline) {
            Ok(()) => {
                let item = self.buf.borrow_mut().remove(0);
                Ok(item)
            }
            Err(ResultCode::TimedOut) => Err(WaitTimeoutError::TimedOut),
            Err(ResultCode::Interrupted) => Err(WaitTimeoutError::Interrupted),
            Err(_) => crate::error::fatal("unexpected queue pop wait result"),
        }
    }

    fn wake_one_pusher(&self) {
        let mut lock = klock::lock_cpu();
        if self.not_full.wake_one(&mut lock).is_some() {
            sched::dispatch(lock);
        }
    }
}

impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: `buf` is only touched under the kernel lock; `T: Send` since an
// item pushed by one thread is popped and dropped by another. Needed for
// `static Q: Queue<T, N> = Queue::new()` declarations.
unsafe impl<T: Send, const N: usize> Sync for Queue<T, N> {}

/// A bounded queue that always pops its highest-priority element first,
/// ties broken FIFO (spec §4.7's "message queue" variant).
pub struct MessageQueue<T, const N: usize> {
    buf: RefCell<ArrayVec<(u8, T), N>>,
    not_full: WaitQueue,
    not_empty: WaitQueue,
}

impl<T, const N: usize> MessageQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            buf: RefCell::new(ArrayVec::new_const()),
            not_full: WaitQueue::new(QueueOrder::Priority),
            not_empty: WaitQueue::new(QueueOrder::Priority),
        }
    }

    pub fn len(&self) -> usize {
        let _lock = klock::lock_cpu();
        self.buf.borrow().len()
    }

    /// Push `item` with the given message priority (higher pops first)
    /// without blocking, or fail with `Busy` if full.
    pub fn try_push(&'static self, priority: u8, item: T) -> Result<(), (T, crate::error::PollError)> {
        let mut lock = klock::lock_cpu();
        if self.buf.borrow().is_full() {
            return Err((item, crate::error::PollError::Busy));
        }
        self.insert_sorted(priority, item);
        if self.not_empty.wake_one(&mut lock).is_some() {
            sched::dispatch(lock);
        }
        Ok(())
    }

    fn insert_sorted(&self, priority: u8, item: T) {
        let mut buf = self.buf.borrow_mut();
        let pos = buf.iter().position(|(p, _)| *p < priority).unwrap_or(buf.len());
        buf.insert(pos, (priority, item));
    }

    /// Push `item` with the given message priority, blocking indefinitely
    /// while the queue is full.
    pub fn push(&'static self, priority: u8, item: T) -> Result<(), (T, WaitError)> {
        match self.push_timeout(priority, item, tick::INFINITE) {
            Ok(()) => Ok(()),
            Err((item, PushTimeoutError::Interrupted)) => Err((item, WaitError::Interrupted)),
            Err((_, PushTimeoutError::TimedOut)) => {
                crate::error::fatal("infinite message queue push reported a timeout")
            }
            Err((_, PushTimeoutError::WouldOverflow)) => unreachable!("blocking push never overflows"),
        }
    }

    /// Push `item`, blocking for at most `timeout` ticks while full.
    pub fn push_timeout(
        &'static self,
        priority: u8,
        item: T,
        timeout: Duration,
    ) -> Result<(), (T, PushTimeoutError)> {
        let lock = klock::lock_cpu();
        if !self.buf.borrow().is_full() {
            self.insert_sorted(priority, item);
            drop(lock);
            self.wake_one_popper();
            return Ok(());
        }
        let current = sched::current_or_fatal(&lock);
        let deadline = (timeout != tick::INFINITE).then(|| tick::now().wrapping_add(timeout as u64));
        match self.not_full.block(lock, current, ThreadState::BlockedOnMessageQueuePush, deadline) {
            Ok(()) => {
                self.insert_sorted(priority, item);
                Ok(())
            }
            Err(ResultCode::TimedOut) => Err((item, PushTimeoutError::TimedOut)),
            Err(ResultCode::Interrupted) => Err((item, PushTimeoutError::Interrupted)),
            Err(_) => crate::error::fatal("unexpected message queue push wait result"),
        }
    }

    fn wake_one_popper(&self) {
        let mut lock = klock::lock_cpu();
        if self.not_empty.wake_one(&mut lock).is_some() {
            sched::dispatch(lock);
        }
    }

    /// Pop the highest-priority item without blocking, or fail with `Busy`
    /// if empty.
    pub fn try_pop(&'static self) -> Result<(u8, T), crate::error::PollError> {
        let mut lock = klock::lock_cpu();
        let mut buf = self.buf.borrow_mut();
        if buf.is_empty() {
            return Err(crate::error::PollError::Busy);
        }
        let item = buf.remove(0);
        drop(buf);
        if self.not_full.wake_one(&mut lock).is_some() {
            sched::dispatch(lock);
        }
        Ok(item)
    }

    /// Pop the highest-priority item, blocking indefinitely while empty.
    pub fn pop(&'static self) -> Result<(u8, T), WaitError> {
        self.pop_timeout(tick::INFINITE).map_err(crate::error::expect_not_timed_out)
    }

    /// Pop the highest-priority item, blocking for at most `timeout`
    /// ticks while empty.
    pub fn pop_timeout(&'static self, timeout: Duration) -> Result<(u8, T), WaitTimeoutError> {
        let lock = klock::lock_cpu();
        if !self.buf.borrow().is_empty() {
            let item = self.buf.borrow_mut().remove(0);
            drop(lock);
            self.wake_one_pusher();
            return Ok(item);
        }
        let current = sched::current_or_fatal(&lock);
        let deadline = (timeout != tick::INFINITE).then(|| tick::now().wrapping_add(timeout as u64));
        match self.not_empty.block(lock, current, ThreadState::BlockedOnMessageQueuePop, deadline) {
            Ok(()) => Ok(self.buf.borrow_mut().remove(0)),
            Err(ResultCode::TimedOut) => Err(WaitTimeoutError::TimedOut),
            Err(ResultCode::Interrupted) => Err(WaitTimeoutError::Interrupted),
            Err(_) => crate::error::fatal("unexpected message queue pop wait result"),
        }
    }

    fn wake_one_pusher(&self) {
        let mut lock = klock::lock_cpu();
        if self.not_full.wake_one(&mut lock).is_some() {
            sched::dispatch(lock);
        }
    }
}

impl<T, const N: usize> Default for MessageQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: see `Queue`'s impl above.
unsafe impl<T: Send, const N: usize> Sync for MessageQueue<T, N> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_queue_is_empty() {
        static Q: Queue<u32, 4> = Queue::new();
        assert_eq!(Q.capacity(), 4);
    }
}
