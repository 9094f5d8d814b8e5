//! Thread control blocks and lifecycle operations (spec §3, §4.2, §4.3;
//! component L2).
//!
//! Grounded on the teacher's `task.rs` (`TaskCb<Traits>` and its
//! `activate`/`wait_until_woken_up`/`park_current_task`/
//! `set_task_base_priority` family of functions), collapsed from a
//! `Traits: KernelTraits`-generic struct to one concrete `Tcb` value type —
//! this crate has exactly one kernel instance (spec §9: "explicit
//! process-wide state"). The C++ original's deep `Thread`/`DynamicThread`/
//! `StaticThread` class hierarchy (see `original_source/.../DynamicThreadBase.hpp`)
//! collapses the same way spec §9 describes: one value type plus a plain
//! `fn(usize)` entry point, with no v-table-based type erasure.
use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::ResultCode;
use crate::klock::{self, CpuLockGuard};
use crate::list::{Links, Node};
use crate::mutex::{MutexCb, OwnedByThreadRole};
use crate::port::StackPointer;
use crate::sched::{self, Priority, SchedulingPolicy};
use crate::signal::SignalState;
use crate::tick::{self, Deadline, Duration, Tick};

/// Marker types selecting which of a [`Tcb`]'s several embedded [`Links`]
/// an operation means; see [`crate::list::Node`].
pub struct ReadyRole;
pub struct WaitRole;
pub struct TimeoutRole;

/// A thread's lifecycle state (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Constructed but not yet activated.
    Created,
    /// On the ready queue or currently running.
    Runnable,
    /// Blocked in `sleep_until`, waking at the given tick.
    SleepingUntil(Tick),
    BlockedOnSemaphore,
    BlockedOnMutex,
    BlockedOnConditionVariable,
    BlockedOnFifoQueuePush,
    BlockedOnFifoQueuePop,
    BlockedOnMessageQueuePush,
    BlockedOnMessageQueuePop,
    WaitingForSignal,
    Terminated(TerminationKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationKind {
    /// A joiner already collected the result.
    Joined,
    /// The thread was detached; nothing to join.
    Detached,
    /// Terminated, joinable, awaiting a joiner.
    JoinableTerminated,
}

/// Whether a thread may be joined, matching the `THREAD_DETACH_ENABLE`
/// build knob (spec §6/SPEC_FULL §A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPolicy {
    Joinable,
    Detached,
}

/// A thread control block. Always referenced as `&'static Tcb`: this
/// kernel has no allocator-backed thread objects (spec §9 — "no reference
/// counting; all transient borrows under the kernel lock"), so every
/// thread is declared as a `static` (see [`Tcb::new`], a `const fn`).
pub struct Tcb {
    pub name: &'static str,
    base_priority: Cell<Priority>,
    effective_priority: Cell<Priority>,
    /// Set once `effective_priority > base_priority` due to priority
    /// inheritance or the priority-ceiling protocol (spec §3, "boosted"
    /// tag).
    boosted: Cell<bool>,
    policy: SchedulingPolicy,
    remaining_quantum: Cell<Tick>,
    state: Cell<ThreadState>,
    join_policy: Cell<JoinPolicy>,
    stack_pointer: Cell<StackPointer>,
    wake_tick: Cell<Tick>,
    /// Result delivered to a blocked thread when it's unblocked by
    /// something other than the condition it was waiting for being
    /// satisfied (timeout, signal interruption, explicit wake).
    wait_result: Cell<Option<ResultCode>>,
    /// Mutexes currently owned by this thread, most-recently-locked first;
    /// walked by `mutex::recompute_effective_priority` (spec §4.4).
    pub(crate) owned_mutexes: crate::list::List<MutexCb, OwnedByThreadRole>,
    pub signals: SignalState,
    ready_links: Links<Tcb, ReadyRole>,
    wait_links: Links<Tcb, WaitRole>,
    timeout_links: Links<Tcb, TimeoutRole>,
    /// The wait queue this thread is currently blocked on, if any. Lets a
    /// canceller (timeout expiry, signal interruption) find and unlink it
    /// without the wait queue itself being involved, mirroring the
    /// teacher's `Wait::wait_queue` back-reference.
    current_wait_queue: Cell<Option<&'static crate::wait::WaitQueue>>,
    /// The mutex this thread is blocked trying to lock, if any. Lets
    /// priority-inheritance propagation walk "who owns what I'm waiting
    /// for" chains (spec §4.4) without every wait queue needing to know
    /// it belongs to a mutex specifically.
    blocked_on_mutex: Cell<Option<&'static MutexCb>>,
    entry: fn(usize),
    arg: usize,
    id: u32,
}

// Safety: every field is only ever touched while the caller holds the
// kernel lock (or, for `name`/`entry`/`arg`/`id`, is immutable after
// construction). Needed so application/test code can declare
// `static THREAD: Tcb = Tcb::new(...)`, exactly as `Tcb::new`'s doc
// requires.
unsafe impl Sync for Tcb {}

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

impl Tcb {
    /// Construct a new thread control block. Must be assigned to a
    /// `static` (or otherwise given `'static` storage) before being passed
    /// to [`activate`] — the kernel only ever operates on `&'static Tcb`.
    pub const fn new(
        name: &'static str,
        base_priority: Priority,
        policy: SchedulingPolicy,
        join_policy: JoinPolicy,
        entry: fn(usize),
        arg: usize,
    ) -> Self {
        Self {
            name,
            base_priority: Cell::new(base_priority),
            effective_priority: Cell::new(base_priority),
            boosted: Cell::new(false),
            policy,
            remaining_quantum: Cell::new(0),
            state: Cell::new(ThreadState::Created),
            join_policy: Cell::new(join_policy),
            stack_pointer: Cell::new(StackPointer(0)),
            wake_tick: Cell::new(0),
            wait_result: Cell::new(None),
            owned_mutexes: crate::list::List::new(),
            signals: SignalState::new(),
            ready_links: Links::new(),
            wait_links: Links::new(),
            timeout_links: Links::new(),
            current_wait_queue: Cell::new(None),
            blocked_on_mutex: Cell::new(None),
            entry,
            arg,
            id: 0,
        }
    }

    pub fn base_priority(&self) -> Priority {
        self.base_priority.get()
    }

    pub fn effective_priority(&self) -> Priority {
        self.effective_priority.get()
    }

    pub fn is_boosted(&self) -> bool {
        self.boosted.get()
    }

    pub fn state(&self) -> ThreadState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, s: ThreadState) {
        self.state.set(s);
    }

    pub(crate) fn stack_pointer(&self) -> StackPointer {
        self.stack_pointer.get()
    }

    pub(crate) fn take_wait_result(&self) -> Option<ResultCode> {
        self.wait_result.take()
    }

    pub(crate) fn set_wait_result(&self, r: ResultCode) {
        self.wait_result.set(Some(r));
    }

    /// Recompute `effective_priority` as `max(base_priority, highest
    /// ceiling/boost among owned mutexes)` (spec §4.4 / DESIGN.md Open
    /// Question 3) and reorder the ready queue if currently Runnable.
    pub(crate) fn recompute_effective_priority(&'static self, lock: &mut CpuLockGuard) {
        let old = self.effective_priority();
        let mut new = self.base_priority();
        for m in self.owned_mutexes.iter() {
            if let Some(p) = m.boost_priority() {
                if p > new {
                    new = p;
                }
            }
        }
        if new == old {
            return;
        }
        self.effective_priority.set(new);
        self.boosted.set(new > self.base_priority());
        if matches!(self.state(), ThreadState::Runnable) {
            sched::reorder_ready(lock, self, old);
        } else {
            crate::wait::reorder_current_wait(self);
        }
    }
}

impl Node<ReadyRole> for Tcb {
    fn links(&self) -> &Links<Self, ReadyRole> {
        &self.ready_links
    }
}
impl Node<WaitRole> for Tcb {
    fn links(&self) -> &Links<Self, WaitRole> {
        &self.wait_links
    }
}
impl Node<TimeoutRole> for Tcb {
    fn links(&self) -> &Links<Self, TimeoutRole> {
        &self.timeout_links
    }
}
impl Deadline<TimeoutRole> for Tcb {
    fn deadline(&self) -> Tick {
        self.wake_tick.get()
    }
}

/// Global timeout list: threads currently sleeping or blocked-with-timeout,
/// sorted by wake tick (component L1, reused by every blocking primitive).
static TIMEOUTS: tick::DeadlineList<Tcb, TimeoutRole> = tick::DeadlineList::new();

pub(crate) fn arm_timeout(tcb: &'static Tcb, deadline: Tick) {
    tcb.wake_tick.set(deadline);
    TIMEOUTS.insert(tcb);
}

pub(crate) fn disarm_timeout(tcb: &'static Tcb) {
    if Node::<TimeoutRole>::links(tcb).is_linked() {
        TIMEOUTS.remove(tcb);
    }
}

/// Drop every pending timeout. Used by [`crate::boot::test_init`]; see
/// [`crate::sched::reset_for_test`] for why this is necessary at all.
#[cfg(any(test, feature = "std"))]
pub fn reset_for_test() {
    let _lock = klock::lock_cpu();
    while TIMEOUTS.drain_expired(Tick::MAX).next().is_some() {}
}

/// Record/clear which wait queue `tcb` is presently blocked on. Called by
/// [`crate::wait::WaitQueue`] itself; not meant for other callers.
pub(crate) fn set_current_wait_queue(tcb: &'static Tcb, wq: Option<&'static crate::wait::WaitQueue>) {
    tcb.current_wait_queue.set(wq);
}

pub(crate) fn current_wait_queue(tcb: &'static Tcb) -> Option<&'static crate::wait::WaitQueue> {
    tcb.current_wait_queue.get()
}

impl Tcb {
    pub(crate) fn blocked_on_mutex(&self) -> Option<&'static MutexCb> {
        self.blocked_on_mutex.get()
    }

    pub(crate) fn set_blocked_on_mutex(&self, m: Option<&'static MutexCb>) {
        self.blocked_on_mutex.set(m);
    }
}

/// Called from the tick interrupt (after `tick::on_tick`). Wakes every
/// thread whose timeout has expired with `ResultCode::TimedOut`, and
/// drives round-robin quantum expiry for the current thread.
pub fn tick_hook() {
    let mut lock = klock::lock_cpu();
    let now = tick::now();
    for tcb in TIMEOUTS.drain_expired(now) {
        wake_with_result(&mut lock, tcb, ResultCode::TimedOut);
    }
    let Some(cur) = sched::current(&lock) else {
        sched::dispatch(lock);
        return;
    };
    if let SchedulingPolicy::RoundRobin { quantum } = cur.policy {
        let remaining = cur.remaining_quantum.get();
        if remaining <= 1 {
            cur.remaining_quantum.set(quantum);
            sched::preempt_for_quantum_expiry(lock, cur);
            return;
        }
        cur.remaining_quantum.set(remaining - 1);
    }
    sched::dispatch(lock);
}

/// Move a blocked/sleeping thread back to Runnable with the given error
/// code available via `take_wait_result` (spec §4.4-§4.8: timeout or
/// signal interruption). Unlinks it from whatever wait queue and timeout
/// list it is on. Does not itself call `dispatch` — callers batch multiple
/// wakeups under one lock and dispatch once.
pub(crate) fn wake_with_result(lock: &mut CpuLockGuard, tcb: &'static Tcb, result: ResultCode) {
    disarm_timeout(tcb);
    if let Some(wq) = current_wait_queue(tcb) {
        wq.remove(tcb);
    }
    // Cleared here, under the lock, rather than left for `tcb` to clear
    // once it resumes running unlocked: `blocked_on_mutex` is read by
    // other threads' `propagate_inheritance` chain walks, so it must not
    // still point at a mutex this thread has already stopped waiting on.
    tcb.set_blocked_on_mutex(None);
    tcb.set_wait_result(result);
    tcb.set_state(ThreadState::Runnable);
    sched::make_ready(lock, tcb);
}

/// Move a blocked/sleeping thread back to Runnable because the condition
/// it was waiting for was satisfied (not a timeout or interruption).
/// Leaves `wait_result` at `None`, which `block_current` reads back as
/// `Ok(())`. The caller (a `WaitQueue`) has already unlinked `tcb` from
/// itself; this only clears the timeout list entry.
pub(crate) fn wake_ok(lock: &mut CpuLockGuard, tcb: &'static Tcb) {
    disarm_timeout(tcb);
    tcb.set_blocked_on_mutex(None);
    tcb.set_state(ThreadState::Runnable);
    sched::make_ready(lock, tcb);
}

/// The real entry point every activated thread's stack is initialized
/// with, wrapping the `Tcb`'s own `entry`/`arg`. A thread's very first run
/// never passes through `sched`'s post-switch resumption point (there is
/// no earlier call into `dispatch` for it to return from), so this is the
/// one other place a just-started thread needs to check for asynchronous
/// signal catchers due against it before anything else it does (spec
/// §4.8) — a signal generated/queued against a thread before its first
/// activation must still be delivered promptly once it starts.
fn first_entry(tcb_addr: usize) {
    // Safety: `tcb_addr` is always `tcb as *const Tcb as usize` for the
    // `&'static Tcb` passed to `activate_core` just above.
    let tcb: &'static Tcb = unsafe { &*(tcb_addr as *const Tcb) };
    crate::signal::deliver_pending_catchers();
    (tcb.entry)(tcb.arg)
}

/// Transition a `Created` thread to `Runnable` and place it on the ready
/// queue, without triggering a dispatch. Used by [`crate::boot::init`] to
/// bring up every boot-time thread before the scheduler picks any of them
/// to run; ordinary runtime activation should use [`activate`] instead.
pub(crate) fn activate_core(lock: &mut CpuLockGuard, tcb: &'static Tcb, stack: &'static mut [u8]) {
    assert!(matches!(tcb.state(), ThreadState::Created), "activate: thread already started");
    let sp = crate::port::current().initialize_stack(crate::port::StackInit {
        stack,
        entry: first_entry,
        arg: tcb as *const Tcb as usize,
    });
    tcb.stack_pointer.set(sp);
    if let SchedulingPolicy::RoundRobin { quantum } = tcb.policy {
        tcb.remaining_quantum.set(quantum);
    }
    tcb.set_state(ThreadState::Runnable);
    sched::make_ready(lock, tcb);
}

/// Transition a `Created` thread to `Runnable`, place it on the ready
/// queue, and immediately re-evaluate who should be running (spec §4.2:
/// activating a higher-priority thread preempts the caller right away).
pub fn activate(tcb: &'static Tcb, stack: &'static mut [u8]) {
    let mut lock = klock::lock_cpu();
    activate_core(&mut lock, tcb, stack);
    sched::dispatch(lock);
}

/// Block the current thread with the given `ThreadState`, optionally with
/// a timeout. Returns once woken, yielding the delivered result (`Ok(())`
/// if woken by the condition being satisfied, `Err` for timeout/
/// interruption). The caller must have already linked `tcb` into whatever
/// wait queue is appropriate *before* calling this, and must not hold any
/// lock of its own across the call other than `lock`.
pub fn block_current(
    mut lock: CpuLockGuard,
    tcb: &'static Tcb,
    state: ThreadState,
    timeout: Option<Tick>,
) -> Result<(), ResultCode> {
    tcb.wait_result.set(None);
    tcb.set_state(state);
    if let Some(deadline) = timeout {
        arm_timeout(tcb, deadline);
    }
    sched::dispatch(lock);
    // `dispatch` returned control to us, which only happens once this
    // thread is Runnable/current again (the port parked us and only
    // unparks us once the scheduler picked us, at which point our caller
    // resumes right here on our own stack).
    match tcb.take_wait_result() {
        Some(r) => Err(r),
        None => Ok(()),
    }
}

/// Block the calling thread until tick `deadline` (spec §4.2's
/// `sleepUntil`). Returns `0` if it actually slept the full duration, or
/// the number of ticks remaining if woken early by a signal interruption
/// (signal delivery wakes a `SleepingUntil` thread directly) — there is no
/// wait queue involved, just an entry on the shared timeout list.
pub fn sleep_until(deadline: Tick) -> Duration {
    let lock = klock::lock_cpu();
    let current = sched::current_or_fatal(&lock);
    if tick::now() >= deadline {
        return 0;
    }
    match block_current(lock, current, ThreadState::SleepingUntil(deadline), Some(deadline)) {
        Ok(()) => 0,
        Err(ResultCode::TimedOut) => 0,
        Err(ResultCode::Interrupted) => deadline.saturating_sub(tick::now()) as Duration,
        Err(_) => crate::error::fatal("unexpected sleep result"),
    }
}

/// As [`sleep_until`], but relative to the current tick (spec §4.2's
/// `sleepFor`).
pub fn sleep_for(duration: Duration) -> Duration {
    assert!(duration >= 0, "sleep duration must not be negative");
    sleep_until(tick::now().wrapping_add(duration as u64))
}

/// Terminate the current thread. If joinable, parks it in
/// `JoinableTerminated` state (its TCB/stack are not reclaimed until a
/// joiner collects it, or detaches it) and hands it to the idle thread's
/// deferred deleter (`boot::deferred_delete`, SPEC_FULL §B) rather than
/// reclaiming memory synchronously — matching the original's
/// `DeferredThreadDeleter.hpp`.
pub fn terminate(lock: CpuLockGuard, tcb: &'static Tcb) -> ! {
    let mut lock = lock;
    let kind = match tcb.join_policy.get() {
        JoinPolicy::Detached => TerminationKind::Detached,
        JoinPolicy::Joinable => TerminationKind::JoinableTerminated,
    };
    tcb.set_state(ThreadState::Terminated(kind));
    if matches!(kind, TerminationKind::JoinableTerminated) {
        crate::boot::defer_delete(tcb);
    }
    sched::dispatch(lock);
    unreachable!("terminated thread resumed")
}

/// Change `tcb`'s base priority (spec §4.3's `set_priority`). Only the
/// base priority changes here; `effective_priority` is immediately
/// re-derived (DESIGN.md Open Question 3), which may itself trigger a
/// further chain-walk if `tcb` currently boosts another thread through a
/// held mutex it does not itself own (it can't — ownership is the other
/// direction), or more precisely, if `tcb` is itself blocked holding a
/// mutex some other thread is waiting on, that waiter's priority-
/// inheritance boost target is unaffected by `tcb`'s own base priority
/// change except through the `max()` re-derivation happening here.
pub fn set_priority(lock: &mut CpuLockGuard, tcb: &'static Tcb, new_base: Priority) {
    tcb.base_priority.set(new_base);
    tcb.recompute_effective_priority(lock);
}
