//! A shared blocking wait-queue, used by every synchronization primitive
//! that parks threads (mutex, semaphore, condvar, queues) (component L2/L4
//! shared plumbing).
//!
//! Grounded on the teacher's `wait.rs` (`WaitQueue`, `QueueOrder`,
//! `complete_wait`, `interrupt_task`), collapsed from its
//! `Wait<Traits>`-on-the-stack-plus-intrusive-list design (needed there
//! because one task can simultaneously hold wait objects for several
//! object *kinds*, e.g. event groups with bit masks attached) down to a
//! direct list of `&'static Tcb`, since here a thread is blocked on
//! exactly one wait queue at a time and carries no per-wait payload beyond
//! its own [`crate::task::ThreadState`].
use crate::klock::CpuLockGuard;
use crate::list::List;
use crate::sched::Priority;
use crate::task::{self, ThreadState, Tcb, WaitRole};
use crate::tick::Tick;

/// How waiters are ordered when more than one is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrder {
    Fifo,
    /// Highest effective priority first; FIFO among equal priorities.
    Priority,
}

pub struct WaitQueue {
    waiters: List<Tcb, WaitRole>,
    order: QueueOrder,
}

impl WaitQueue {
    pub const fn new(order: QueueOrder) -> Self {
        Self { waiters: List::new(), order }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn first_waiter(&self) -> Option<&'static Tcb> {
        self.waiters.front()
    }

    fn insertion_priority_compare(a: &Tcb, b: &Tcb) -> bool {
        a.effective_priority() > b.effective_priority()
    }

    /// Block the current thread on this wait queue. Consumes the kernel
    /// lock like every other dispatch-triggering operation; returns once
    /// woken, with `Ok(())` for a normal wake-up or `Err` for timeout/
    /// signal interruption (spec §4.4-§4.8's common blocking contract).
    pub fn block(
        &'static self,
        lock: CpuLockGuard,
        tcb: &'static Tcb,
        state: ThreadState,
        timeout: Option<Tick>,
    ) -> Result<(), crate::error::ResultCode> {
        self.block_with(lock, tcb, state, timeout, |_| {})
    }

    /// Like [`WaitQueue::block`], but calls `after_enqueue` with the lock
    /// still held once `tcb` has actually been inserted into the queue,
    /// before blocking. Used by [`crate::mutex`]'s priority-inheritance
    /// protocol to re-evaluate the owner's boost immediately — reflecting
    /// this new waiter — rather than only once the wait ends (spec §4.4:
    /// the boost applies for as long as a higher-priority waiter is
    /// queued, not just at unlock time).
    pub fn block_with(
        &'static self,
        mut lock: CpuLockGuard,
        tcb: &'static Tcb,
        state: ThreadState,
        timeout: Option<Tick>,
        after_enqueue: impl FnOnce(&mut CpuLockGuard),
    ) -> Result<(), crate::error::ResultCode> {
        match self.order {
            QueueOrder::Fifo => self.waiters.push_back(tcb),
            QueueOrder::Priority => {
                self.waiters.insert_sorted_by(tcb, Self::insertion_priority_compare)
            }
        }
        task::set_current_wait_queue(tcb, Some(self));
        after_enqueue(&mut lock);
        task::block_current(lock, tcb, state, timeout)
    }

    /// Wake the highest-priority (or longest-waiting, for FIFO) blocked
    /// thread, if any. Does not itself dispatch; batch several wake-ups
    /// under one lock and let the caller dispatch once.
    pub fn wake_one(&self, lock: &mut CpuLockGuard) -> Option<&'static Tcb> {
        let tcb = self.waiters.pop_front()?;
        task::set_current_wait_queue(tcb, None);
        task::wake_ok(lock, tcb);
        Some(tcb)
    }

    /// Wake every currently blocked thread, e.g. for a condition variable
    /// broadcast or a mutex being abandoned.
    pub fn wake_all(&self, lock: &mut CpuLockGuard) {
        while self.wake_one(lock).is_some() {}
    }

    /// Remove `tcb` from this queue without waking it (used when a
    /// caller, e.g. semaphore bulk-release, decides a specific waiter
    /// should not be the one woken).
    pub fn remove(&self, tcb: &'static Tcb) {
        self.waiters.remove(tcb);
        task::set_current_wait_queue(tcb, None);
    }

    /// Re-sort `tcb` within this queue after its effective priority
    /// changed while blocked here (spec §4.4 priority inheritance must
    /// reorder wait queues the same way it reorders ready queues).
    fn reorder(&self, tcb: &'static Tcb) {
        if self.order == QueueOrder::Fifo {
            return;
        }
        self.waiters.remove(tcb);
        self.waiters.insert_sorted_by(tcb, Self::insertion_priority_compare);
    }
}

/// Re-sort `tcb` in whichever wait queue it is currently blocked on, if
/// any. Called by [`crate::task::set_priority`] and by priority-
/// inheritance recomputation after an effective priority change.
pub(crate) fn reorder_current_wait(tcb: &'static Tcb) {
    if let Some(wq) = task::current_wait_queue(tcb) {
        wq.reorder(tcb);
    }
}

/// Highest effective priority among a queue's waiters, used by mutexes
/// implementing priority inheritance to know what to boost the owner to.
pub fn highest_waiter_priority(wq: &WaitQueue) -> Option<Priority> {
    wq.waiters.iter().map(|t| t.effective_priority()).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved_on_construction() {
        let wq = WaitQueue::new(QueueOrder::Fifo);
        assert!(wq.is_empty());
        assert_eq!(wq.order, QueueOrder::Fifo);
    }
}
