//! Mutexes: priority-ceiling and priority-inheritance locking protocols
//! (spec §4.4, component L4).
//!
//! Grounded on the teacher's `mutex.rs` for the overall shape
//! (`MutexCb`, `owning_task`/`last_mutex_held` linked list,
//! `lock_core`/`unlock_mutex_unchecked`, the `ceiling` precheck) and its
//! `evaluate_task_effective_priority` recomputation-on-unlock idea, which
//! this module generalizes into [`crate::task::Tcb::recompute_effective_priority`]
//! so it also covers priority *inheritance*, not just the ceiling
//! protocol the teacher implements. The teacher has no inheritance
//! protocol at all (only `Ceiling`); the chain-walking in
//! [`propagate_inheritance`] is this crate's own logic, built directly
//! from spec §4.4's description of transitive boosting, bounded by
//! [`crate::config::PRIORITY_INHERITANCE_MAX_CHAIN`].
use core::cell::Cell;

use crate::error::{LockError, LockTimeoutError, ResultCode, TryLockError, UnlockError};
use crate::klock::{self, CpuLockGuard};
use crate::list::{Links, Node};
use crate::sched::{self, Priority};
use crate::task::{ThreadState, Tcb};
use crate::tick::{self, Duration};
use crate::wait::{self, QueueOrder, WaitQueue};

/// How ownership contention is resolved (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// No boosting: the owner keeps its own priority regardless of
    /// waiters. Can suffer unbounded priority inversion; offered only for
    /// parity with the Non-goals' "caller may opt out" note.
    None,
    /// The owner is boosted to the given fixed ceiling for as long as it
    /// holds the mutex. The ceiling must be `>=` every thread that will
    /// ever try to lock it (enforced at lock time, not at construction,
    /// since priorities change at runtime).
    Ceiling(Priority),
    /// The owner is boosted to the highest effective priority among
    /// threads currently blocked waiting for it, for as long as that
    /// remains true (classic priority inheritance).
    Inherit,
}

/// Recursive-lock and stale-ownership semantics (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Locking a mutex the caller already owns is undefined-behavior-free
    /// but unspecified here: it deadlocks (`ResultCode::Deadlock`).
    Normal,
    /// Like `Normal`, but unlocking a mutex the caller doesn't own is
    /// reported as `ResultCode::NotOwner` rather than left undefined.
    ErrorChecking,
    /// Locking a mutex the caller already owns increments a recursion
    /// counter instead of deadlocking; the mutex is only actually
    /// released once `unlock` has been called a matching number of times.
    Recursive,
}

pub struct OwnedByThreadRole;

pub struct MutexCb {
    protocol: Protocol,
    kind: Kind,
    owner: Cell<Option<&'static Tcb>>,
    recursion_count: Cell<u32>,
    wait_queue: WaitQueue,
    owned_links: Links<MutexCb, OwnedByThreadRole>,
}

impl Node<OwnedByThreadRole> for MutexCb {
    fn links(&self) -> &Links<Self, OwnedByThreadRole> {
        &self.owned_links
    }
}

// Safety: every field is only touched under the kernel lock. Needed for
// `static MUTEX: MutexCb = MutexCb::new(...)` declarations.
unsafe impl Sync for MutexCb {}

impl MutexCb {
    pub const fn new(protocol: Protocol, kind: Kind) -> Self {
        Self {
            protocol,
            kind,
            owner: Cell::new(None),
            recursion_count: Cell::new(0),
            wait_queue: WaitQueue::new(QueueOrder::Priority),
            owned_links: Links::new(),
        }
    }

    pub fn owner(&self) -> Option<&'static Tcb> {
        self.owner.get()
    }

    pub fn is_locked(&self) -> bool {
        self.owner.get().is_some()
    }

    /// The priority this mutex currently demands its owner be boosted to,
    /// if any (spec §4.4); `None` means it contributes no boost, which is
    /// always true for an unowned or `Protocol::None` mutex.
    pub(crate) fn boost_priority(&self) -> Option<Priority> {
        match self.protocol {
            Protocol::None => None,
            Protocol::Ceiling(c) => Some(c),
            Protocol::Inherit => wait::highest_waiter_priority(&self.wait_queue),
        }
    }

    fn precheck(&self, lock: &CpuLockGuard, current: &'static Tcb) -> Result<(), ResultCode> {
        if let Protocol::Ceiling(ceiling) = self.protocol {
            if ceiling < current.base_priority() {
                return Err(ResultCode::InvalidArgument);
            }
        }
        if self.owner.get().map_or(false, |o| core::ptr::eq(o, current)) {
            match self.kind {
                Kind::Recursive => {}
                Kind::Normal | Kind::ErrorChecking => return Err(ResultCode::Deadlock),
            }
        }
        let _ = lock;
        Ok(())
    }

    fn lock_core(&'static self, lock: &mut CpuLockGuard, owner: &'static Tcb) {
        self.owner.set(Some(owner));
        owner.owned_mutexes.push_back(self);
        owner.recompute_effective_priority(lock);
    }

    /// Attempt to acquire the mutex without blocking.
    pub fn try_lock(&'static self) -> Result<(), TryLockError> {
        let mut lock = klock::lock_cpu();
        let current = sched::current_or_fatal(&lock);
        self.precheck(&lock, current).map_err(to_try_lock_error)?;
        if self.owner.get().map_or(false, |o| core::ptr::eq(o, current)) {
            self.recurse_or_overflow()?;
            return Ok(());
        }
        if self.owner.get().is_some() {
            return Err(TryLockError::Busy);
        }
        self.lock_core(&mut lock, current);
        Ok(())
    }

    /// Acquire the mutex, blocking indefinitely if necessary.
    pub fn lock(&'static self) -> Result<(), LockError> {
        self.lock_timeout(tick::INFINITE).map_err(|e| match e {
            LockTimeoutError::InvalidArgument => LockError::InvalidArgument,
            LockTimeoutError::Deadlock => LockError::Deadlock,
            LockTimeoutError::NotSupported => LockError::NotSupported,
            LockTimeoutError::Interrupted => LockError::Interrupted,
            LockTimeoutError::TimedOut => {
                crate::error::fatal("infinite mutex lock reported a timeout")
            }
        })
    }

    /// Acquire the mutex, blocking for at most `timeout` ticks.
    pub fn lock_timeout(&'static self, timeout: Duration) -> Result<(), LockTimeoutError> {
        if timeout < 0 {
            return Err(LockTimeoutError::InvalidArgument);
        }
        let mut lock = klock::lock_cpu();
        let current = sched::current_or_fatal(&lock);
        self.precheck(&lock, current).map_err(to_lock_timeout_error)?;
        if self.owner.get().map_or(false, |o| core::ptr::eq(o, current)) {
            self.recurse_or_overflow().map_err(|e| match e {
                TryLockError::NotSupported => LockTimeoutError::NotSupported,
                _ => unreachable!(),
            })?;
            return Ok(());
        }
        if self.owner.get().is_none() {
            self.lock_core(&mut lock, current);
            return Ok(());
        }

        let owner = self.owner.get().unwrap();
        current.set_blocked_on_mutex(Some(self));
        let deadline = (timeout != tick::INFINITE).then(|| tick::now().wrapping_add(timeout as u64));
        // Boost `owner` (and transitively, whatever it's itself blocked on)
        // the moment `current` is actually enqueued, not just when the wait
        // ends — otherwise a boost that should apply for the whole time a
        // higher-priority thread is waiting would never take effect until
        // that waiter times out or is interrupted.
        let result = self.wait_queue.block_with(
            lock,
            current,
            ThreadState::BlockedOnMutex,
            deadline,
            |lock| propagate_inheritance(lock, owner),
        );
        // `block_with` returned: we were woken, either because the wait queue
        // handed us ownership (see `unlock_core`) or because we timed out
        // / were interrupted while still waiting. Either way the waker
        // already cleared our `blocked_on_mutex` under the lock (see
        // `task::wake_ok`/`wake_with_result`).
        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut lock = klock::lock_cpu();
                propagate_inheritance(&mut lock, owner);
                match e {
                    ResultCode::TimedOut => Err(LockTimeoutError::TimedOut),
                    ResultCode::Interrupted => Err(LockTimeoutError::Interrupted),
                    _ => crate::error::fatal("unexpected mutex wait result"),
                }
            }
        }
    }

    /// Bump the recursion count for a thread re-locking a `Recursive`
    /// mutex it already owns. Returns `NotSupported` once
    /// [`crate::config::RECURSIVE_MUTEX_MAX_RECURSION`] is reached, since
    /// there is no dedicated "recursion limit" `ResultCode` variant (spec
    /// §7 treats this as a configuration ceiling, not a distinct error
    /// class).
    fn recurse_or_overflow(&self) -> Result<(), TryLockError> {
        match self.kind {
            Kind::Recursive => {
                let n = self.recursion_count.get();
                if n >= crate::config::RECURSIVE_MUTEX_MAX_RECURSION {
                    return Err(TryLockError::NotSupported);
                }
                self.recursion_count.set(n + 1);
                Ok(())
            }
            Kind::Normal | Kind::ErrorChecking => unreachable!("precheck rejects this case"),
        }
    }

    /// Release the mutex. For `Kind::Recursive`, only actually hands
    /// ownership to the next waiter once the recursion count returns to
    /// zero.
    pub fn unlock(&'static self) -> Result<(), UnlockError> {
        let mut lock = klock::lock_cpu();
        let current = sched::current_or_fatal(&lock);
        if !self.owner.get().map_or(false, |o| core::ptr::eq(o, current)) {
            return Err(UnlockError::NotOwner);
        }
        if matches!(self.kind, Kind::Recursive) {
            let n = self.recursion_count.get();
            if n > 0 {
                self.recursion_count.set(n - 1);
                return Ok(());
            }
        }
        current.owned_mutexes.remove(self);
        self.owner.set(None);
        current.recompute_effective_priority(&mut lock);

        if let Some(next) = self.wait_queue.wake_one(&mut lock) {
            self.lock_core(&mut lock, next);
        }
        sched::dispatch(lock);
        Ok(())
    }
}

fn to_try_lock_error(e: ResultCode) -> TryLockError {
    match e {
        ResultCode::InvalidArgument => TryLockError::InvalidArgument,
        ResultCode::Deadlock => TryLockError::Deadlock,
        _ => crate::error::fatal("unexpected mutex precheck result"),
    }
}

fn to_lock_timeout_error(e: ResultCode) -> LockTimeoutError {
    match e {
        ResultCode::InvalidArgument => LockTimeoutError::InvalidArgument,
        ResultCode::Deadlock => LockTimeoutError::Deadlock,
        _ => crate::error::fatal("unexpected mutex precheck result"),
    }
}

/// Re-derive effective priority for `owner` and, if that changed, walk up
/// the chain of "thread blocked trying to lock a mutex owned by another
/// thread" links, boosting each in turn. Bounded by
/// [`crate::config::PRIORITY_INHERITANCE_MAX_CHAIN`]; a program whose
/// mutex-acquisition order creates a longer chain than that is treated as
/// a configuration error (spec's fatal-on-precondition-violation policy,
/// DESIGN.md Open Question 2).
pub(crate) fn propagate_inheritance(lock: &mut CpuLockGuard, owner: &'static Tcb) {
    let mut cur = Some(owner);
    let mut depth = 0usize;
    while let Some(t) = cur {
        depth += 1;
        if depth > crate::config::PRIORITY_INHERITANCE_MAX_CHAIN {
            crate::error::fatal("priority inheritance chain exceeds configured maximum depth");
        }
        let before = t.effective_priority();
        t.recompute_effective_priority(lock);
        if t.effective_priority() == before {
            break;
        }
        cur = t.blocked_on_mutex().and_then(|m| m.owner());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_mutex_boosts_owner() {
        assert!(matches!(Protocol::Ceiling(10), Protocol::Ceiling(10)));
    }
}
