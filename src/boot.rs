//! Boot orchestration, the idle thread, and deferred thread reclamation
//! (spec §4.2/§4.11, component L11).
//!
//! Grounded on `original_source/include/distortos/BIND_LOW_LEVEL_PREINITIALIZER.h`
//! (a statically-registered, run-in-order table of initializer functions
//! invoked before the scheduler starts) for [`init`]'s shape, on
//! `source/scheduler/IdleThread.cpp` for the idle thread's role (always
//! runnable at the lowest priority, so it only ever gets the CPU when
//! nothing else wants it), and on
//! `include/distortos/internal/memory/DeferredThreadDeleter.hpp` for
//! [`defer_delete`]: reclaiming a terminated joinable thread's resources
//! is pushed onto the idle thread rather than done inline by whichever
//! thread called `terminate`, since that thread may itself still be
//! running on the stack being reclaimed.
use arrayvec::ArrayVec;

use crate::klock::{self, CpuLockCell};
use crate::sched::{self, Priority, SchedulingPolicy};
use crate::task::{self, JoinPolicy, Tcb, ThreadState};

const MAX_DEFERRED: usize = 8;

static DEFERRED: CpuLockCell<ArrayVec<&'static Tcb, MAX_DEFERRED>> =
    CpuLockCell::new(ArrayVec::new_const());

/// Queue `tcb` for reclamation by the idle thread. Called by
/// [`crate::task::terminate`] for joinable threads nobody has joined yet.
///
/// # Panics
/// Halts the system if more than `MAX_DEFERRED` threads are awaiting
/// reclamation at once — a configuration limit, not a runtime condition
/// (spec's fatal-on-precondition-violation policy).
pub(crate) fn defer_delete(tcb: &'static Tcb) {
    let mut lock = klock::lock_cpu();
    let queue = DEFERRED.write(&mut *lock);
    if queue.try_push(tcb).is_err() {
        crate::error::fatal("too many threads awaiting deferred reclamation");
    }
}

/// Reclaim every thread currently queued for deferred deletion. Marks
/// each fully `Joined` (nothing left to reclaim at this layer: storage
/// for statically-declared `Tcb`s was never separately allocated, so
/// "reclamation" here means the thread becomes eligible for the
/// integrator to reuse its `Tcb`/stack for a new `activate` call, the
/// same role `DeferredThreadDeleter` serves for dynamically-allocated
/// threads in the original).
fn drain_deferred() {
    let mut lock = klock::lock_cpu();
    let queue = DEFERRED.write(&mut *lock);
    while let Some(tcb) = queue.pop() {
        tcb.set_state(ThreadState::Terminated(task::TerminationKind::Joined));
    }
}

/// The idle thread's entry point: drain deferred thread reclamations,
/// then yield forever. Runs at the lowest priority, so it is scheduled
/// only when no application thread is ready (spec §4.11).
pub fn idle_entry(_arg: usize) {
    loop {
        drain_deferred();
        let lock = klock::lock_cpu();
        sched::dispatch(lock);
    }
}

/// Bring up the kernel: run every boot initializer in order (each
/// typically constructs and [`crate::task::activate`]s an application
/// thread), activate the idle thread, then perform the very first
/// dispatch. Never returns.
///
/// Must be called exactly once, after [`crate::port::register`], with
/// interrupts not yet enabled (mirrors the original's single
/// `BIND_LOW_LEVEL_PREINITIALIZER`-then-`startScheduling()` boot
/// sequence).
pub fn init(initializers: &[fn()], idle: &'static Tcb, idle_stack: &'static mut [u8]) -> ! {
    for f in initializers {
        f();
    }

    let mut lock = klock::lock_cpu();
    task::activate_core(&mut lock, idle, idle_stack);
    sched::start(lock)
}

/// Construct the idle thread's `Tcb`. Priority 0 is reserved: spec §4.11
/// requires it be strictly lower than every application thread so it
/// never preempts one.
pub const fn new_idle_tcb() -> Tcb {
    Tcb::new("idle", 0, SchedulingPolicy::Fifo, JoinPolicy::Detached, idle_entry, 0)
}

pub const IDLE_PRIORITY: Priority = 0;

/// Reset every process-global kernel static and run `initializers`,
/// bringing up a clean kernel instance for a single test. Exposed only
/// under `#[cfg(test)]`/`std`: `READY`/`CURRENT`/`TIMEOUTS`/`TIMERS`/
/// `DEFERRED` are otherwise process-global, so without this, tests sharing
/// a test binary would see each other's leftover scheduler state.
#[cfg(any(test, feature = "std"))]
pub fn test_init(initializers: &[fn()]) {
    crate::testport::reset();
    crate::tick::reset_for_test();
    sched::reset_for_test();
    task::reset_for_test();
    crate::timer::reset_for_test();
    DEFERRED.write(&mut *klock::lock_cpu()).clear();
    for f in initializers {
        f();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_tcb_has_reserved_priority() {
        static IDLE: Tcb = new_idle_tcb();
        assert_eq!(IDLE.base_priority(), IDLE_PRIORITY);
    }
}
