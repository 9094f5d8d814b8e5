//! POSIX-style signal delivery (spec §4.8, component L8).
//!
//! Grounded on `original_source/include/distortos/StaticSignalsReceiver.hpp`
//! (a fixed-capacity, non-allocating per-thread signal receiver),
//! `SignalInformationQueueWrapper.hpp` for the pending-bitmask-plus-bounded-
//! info-queue split, and `SignalsCatcher.hpp` for the catcher association
//! table: a signal is always reflected in the pending bitmask (so "is
//! signal N pending" is O(1) and never lossy), and *additionally*, if queue
//! capacity allows, carries a [`SignalInfo`] payload for whichever waiter
//! collects it.
//!
//! Two independent ways a thread can learn a signal is pending:
//! - synchronously, by blocking in [`wait_any`]/[`try_wait_any`] or polling
//!   one specific number with [`accept`] (`sigwait`-style);
//! - asynchronously, by installing a [`set_catcher`] handler that
//!   [`deliver_pending_catchers`] runs on the thread's own stack the next
//!   time it resumes running (`sigaction`-style). Both paths consume the
//!   same pending bit and queued [`SignalInfo`], so a signal is delivered
//!   exactly once regardless of which mechanism claims it first.
use core::cell::{Cell, RefCell};

use arrayvec::ArrayVec;

use crate::error::{PollError, QueueSignalError, ResultCode, WaitError, WaitTimeoutError};
use crate::klock::{self, CpuLockGuard};
use crate::sched;
use crate::task::{self, ThreadState, Tcb};
use crate::tick::{self, Duration};

const QUEUE_CAPACITY: usize = 8;
const MAX_SIGNALS: usize = crate::config::MAX_SIGNAL_NUMBER as usize + 1;

/// One pending signal occurrence: which signal, and an optional payload
/// set by the raiser (spec §4.8's `sigqueue`-style value, as opposed to
/// plain `kill`-style signals which carry `value == 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    pub signal_number: u8,
    pub value: usize,
}

/// A bitmask over signal numbers `0..=MAX_SIGNAL_NUMBER`.
pub type SignalSet = u32;

pub fn signal_bit(signal_number: u8) -> SignalSet {
    debug_assert!(signal_number <= crate::config::MAX_SIGNAL_NUMBER);
    1u32 << signal_number
}

/// A handler installed to run asynchronously on its owning thread's own
/// stack (spec §4.8's catcher association table: `signalNumber ->
/// {handler, maskToApply}`).
#[derive(Clone, Copy)]
pub struct Catcher {
    pub handler: fn(SignalInfo),
    /// Mask installed for the duration of the handler call, restored to the
    /// thread's previous mask once it returns (`sigaction`'s `sa_mask`).
    pub mask_to_apply: SignalSet,
}

/// Per-thread signal state, embedded directly in [`crate::task::Tcb`]
/// (the original embeds an owned `SignalsReceiver` the same way).
pub struct SignalState {
    pending: Cell<SignalSet>,
    mask: Cell<SignalSet>,
    queue: RefCell<ArrayVec<SignalInfo, QUEUE_CAPACITY>>,
    catchers: RefCell<[Option<Catcher>; MAX_SIGNALS]>,
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            pending: Cell::new(0),
            mask: Cell::new(0),
            queue: RefCell::new(ArrayVec::new_const()),
            catchers: RefCell::new([None; MAX_SIGNALS]),
        }
    }

    fn unmasked_pending(&self) -> SignalSet {
        self.pending.get() & !self.mask.get()
    }

    /// Pop one pending, unmasked signal's info, if any, clearing its
    /// pending bit once no more queued occurrences of it remain.
    fn take_one(&self) -> Option<SignalInfo> {
        let available = self.unmasked_pending();
        if available == 0 {
            return None;
        }
        let mut queue = self.queue.borrow_mut();
        if let Some(idx) = queue.iter().position(|i| signal_bit(i.signal_number) & available != 0) {
            let info = queue.remove(idx);
            if !queue.iter().any(|i| i.signal_number == info.signal_number) {
                self.pending.set(self.pending.get() & !signal_bit(info.signal_number));
            }
            Some(info)
        } else {
            // A `generate`d occurrence (or one whose queue slot was
            // exhausted) has no `SignalInfo` recorded; report it with a
            // zeroed payload rather than losing the signal.
            let n = (0..=crate::config::MAX_SIGNAL_NUMBER)
                .find(|&n| signal_bit(n) & available != 0)
                .expect("`available` is non-zero");
            self.pending.set(self.pending.get() & !signal_bit(n));
            Some(SignalInfo { signal_number: n, value: 0 })
        }
    }

    /// Like `take_one`, but restricted to signals in `set`, temporarily
    /// ignoring the thread's own mask (used by `wait_any`/`try_wait_any`,
    /// which sigwait-like APIs always let override the mask for the
    /// duration of the call).
    fn take_one_in(&self, set: SignalSet) -> Option<SignalInfo> {
        let saved = self.mask.get();
        self.mask.set(!set);
        let r = self.take_one();
        self.mask.set(saved);
        r
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

fn check_signal_number(signal_number: u8) -> Result<(), ResultCode> {
    if signal_number > crate::config::MAX_SIGNAL_NUMBER {
        Err(ResultCode::InvalidArgument)
    } else {
        Ok(())
    }
}

/// Wake `target` if it is currently blocked waiting for the signal that was
/// just made pending against it, dispatching if so. Shared tail of
/// [`generate`] and [`queue`].
fn wake_target_if_waiting(lock: CpuLockGuard, target: &'static Tcb) {
    let mut lock = lock;
    if target.signals.unmasked_pending() != 0 {
        // `sleepUntil` has no wait queue of its own to be woken from, but
        // spec §4.2 still allows a pending unmasked signal to cut a sleep
        // short; `WaitingForSignal` is the only state `wake_ok` covers
        // (a wake caused by the condition itself — the signal — arriving).
        if matches!(target.state(), ThreadState::WaitingForSignal) {
            task::wake_ok(&mut lock, target);
            sched::dispatch(lock);
            return;
        } else if matches!(target.state(), ThreadState::SleepingUntil(_)) {
            task::wake_with_result(&mut lock, target, ResultCode::Interrupted);
            sched::dispatch(lock);
            return;
        }
    }
    drop(lock);
}

/// Set `signal_number`'s pending bit against `target` without a payload
/// (spec §4.8's `kill`-style generate). Never fails on queue capacity and
/// never blocks the caller. Wakes `target` if it is blocked in `wait_any`
/// for this signal.
pub fn generate(target: &'static Tcb, signal_number: u8) -> Result<(), ResultCode> {
    check_signal_number(signal_number)?;
    let lock = klock::lock_cpu();
    target.signals.pending.set(target.signals.pending.get() | signal_bit(signal_number));
    wake_target_if_waiting(lock, target);
    Ok(())
}

/// Queue `signal_number` with `value` as its payload against `target`
/// (spec §4.8's `sigqueue`-style queue). Fails with `WouldOverflow`,
/// leaving `target`'s state unmodified, if the bounded signal-info queue
/// has no free slot — unlike `generate`, a queued occurrence's payload
/// must not be silently dropped.
pub fn queue(target: &'static Tcb, signal_number: u8, value: usize) -> Result<(), QueueSignalError> {
    if signal_number > crate::config::MAX_SIGNAL_NUMBER {
        return Err(QueueSignalError::InvalidArgument);
    }
    let lock = klock::lock_cpu();
    let state = &target.signals;
    state
        .queue
        .borrow_mut()
        .try_push(SignalInfo { signal_number, value })
        .map_err(|_| QueueSignalError::WouldOverflow)?;
    state.pending.set(state.pending.get() | signal_bit(signal_number));
    wake_target_if_waiting(lock, target);
    Ok(())
}

/// Install `handler` to run on the calling thread's own stack the next
/// time `signal_number` is pending and unmasked (spec §4.8's catcher
/// association table), replacing the thread's mask with `mask_to_apply`
/// for the handler's duration. Overwrites any catcher previously installed
/// for the same number.
pub fn set_catcher(signal_number: u8, handler: fn(SignalInfo), mask_to_apply: SignalSet) -> Result<(), ResultCode> {
    check_signal_number(signal_number)?;
    let lock = klock::lock_cpu();
    let current = sched::current_or_fatal(&lock);
    current.signals.catchers.borrow_mut()[signal_number as usize] =
        Some(Catcher { handler, mask_to_apply });
    Ok(())
}

/// Remove any catcher installed for `signal_number` on the calling thread;
/// the signal reverts to sigwait/accept-only delivery.
pub fn remove_catcher(signal_number: u8) -> Result<(), ResultCode> {
    check_signal_number(signal_number)?;
    let lock = klock::lock_cpu();
    let current = sched::current_or_fatal(&lock);
    current.signals.catchers.borrow_mut()[signal_number as usize] = None;
    Ok(())
}

/// Replace the calling thread's signal mask, returning the previous one
/// (spec §4.8, `sigprocmask`-style). Masked signals remain pending but are
/// not returned by [`wait_any`]/[`try_wait_any`]/[`accept`], nor delivered
/// to an installed catcher, until unmasked.
pub fn set_mask(mask: SignalSet) -> SignalSet {
    let lock = klock::lock_cpu();
    let current = sched::current_or_fatal(&lock);
    current.signals.mask.replace(mask)
}

/// Collect one pending signal in `set` without blocking.
pub fn try_wait_any(set: SignalSet) -> Result<SignalInfo, PollError> {
    let lock = klock::lock_cpu();
    let current = sched::current_or_fatal(&lock);
    match current.signals.take_one_in(set) {
        Some(info) => Ok(info),
        None => Err(PollError::Busy),
    }
}

/// Poll for exactly `signal_number` without blocking (spec §4.8's
/// `accept`, the single-signal form of [`try_wait_any`]).
pub fn accept(signal_number: u8) -> Result<SignalInfo, PollError> {
    try_wait_any(signal_bit(signal_number))
}

/// Block the calling thread until a signal in `set` is pending, then
/// collect and return it.
pub fn wait_any(set: SignalSet) -> Result<SignalInfo, WaitError> {
    wait_any_timeout(set, tick::INFINITE).map_err(|e| match e {
        WaitTimeoutError::Interrupted => WaitError::Interrupted,
        WaitTimeoutError::TimedOut => crate::error::fatal("infinite signal wait reported a timeout"),
    })
}

/// As [`wait_any`], but blocks for at most `timeout` ticks.
pub fn wait_any_timeout(set: SignalSet, timeout: Duration) -> Result<SignalInfo, WaitTimeoutError> {
    let lock = klock::lock_cpu();
    let current = sched::current_or_fatal(&lock);
    if let Some(info) = current.signals.take_one_in(set) {
        return Ok(info);
    }
    let deadline = (timeout != tick::INFINITE).then(|| tick::now().wrapping_add(timeout as u64));
    block_for_signal(lock, current, set, deadline)
}

fn block_for_signal(
    lock: CpuLockGuard,
    current: &'static Tcb,
    set: SignalSet,
    deadline: Option<tick::Tick>,
) -> Result<SignalInfo, WaitTimeoutError> {
    let saved_mask = current.signals.mask.replace(!set);
    let result = task::block_current(lock, current, ThreadState::WaitingForSignal, deadline);
    current.signals.mask.set(saved_mask);
    match result {
        Ok(()) => Ok(current.signals.take_one_in(set).unwrap_or_else(|| {
            crate::error::fatal("woken for a signal wait but no matching signal is pending")
        })),
        Err(ResultCode::TimedOut) => Err(WaitTimeoutError::TimedOut),
        Err(ResultCode::Interrupted) => Err(WaitTimeoutError::Interrupted),
        Err(_) => crate::error::fatal("unexpected signal wait result"),
    }
}

/// Run every installed catcher whose signal is pending and unmasked
/// against the calling thread, one at a time, each on this thread's own
/// stack (spec §4.8 scenario: an installed catcher interrupts whatever its
/// thread resumes doing, not just whatever it explicitly waits for).
///
/// Must only be called while running as the thread whose catchers are
/// being delivered — never on another thread's behalf. [`crate::sched`]
/// calls this right after a thread's own call into the scheduler returns
/// control to it (the one point, in or out of a context switch, at which
/// "this code is now running on its own stack again" is guaranteed), and
/// [`crate::task::activate_core`]'s entry trampoline calls it once before
/// a freshly activated thread's first instruction, covering a signal
/// raised against a thread before its first run.
pub(crate) fn deliver_pending_catchers() {
    loop {
        let mut lock = klock::lock_cpu();
        let tcb = sched::current_or_fatal(&lock);
        let state = &tcb.signals;
        let available = state.unmasked_pending();
        let found = {
            let catchers = state.catchers.borrow();
            (0..=crate::config::MAX_SIGNAL_NUMBER)
                .find(|&n| signal_bit(n) & available != 0 && catchers[n as usize].is_some())
                .map(|n| (n, catchers[n as usize].unwrap()))
        };
        let Some((n, catcher)) = found else {
            drop(lock);
            return;
        };
        let info = state
            .take_one_in(signal_bit(n))
            .expect("signal bit was set so a matching occurrence must exist");
        let saved_mask = state.mask.replace(catcher.mask_to_apply);
        drop(lock);
        (catcher.handler)(info);
        lock = klock::lock_cpu();
        state.mask.set(saved_mask);
        drop(lock);
    }
}
