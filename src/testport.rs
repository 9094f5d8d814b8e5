//! A `std`-backed [`crate::port::Port`] implementation used only by this
//! crate's own test suite.
//!
//! Grounded loosely on the teacher's `r3_port_std`, which implements a full
//! user-mode-scheduling port using `SIGSTOP`/`SIGCONT` so that simulated
//! tasks really preempt each other like hardware interrupts would. That
//! much fidelity is not needed to exercise *this* crate's own scheduling
//! decisions (the thing under test is the kernel's bookkeeping, not signal
//! delivery racing a real OS scheduler), so this port instead runs each
//! simulated thread on its own `std::thread`, but keeps at most one such
//! thread unparked at a time: the kernel's own "who runs next" decision
//! (`task`/`sched`) is the sole arbiter of which OS thread is allowed to
//! make progress, and this port just mechanically parks/unparks the loser
//! and winner of each decision. That is sufficient to deterministically
//! reproduce the spec §8 scenarios (priority-inheritance chains, blocking,
//! signal interruption) without simulating real hardware preemption.
#![cfg(any(test, feature = "std"))]

use std::sync::{Condvar, Mutex, OnceLock};
use std::thread::{self, Thread};

use crate::port::{Port, StackInit, StackPointer};

struct Slot {
    /// Set once the OS thread backing this slot is allowed to run.
    runnable: Mutex<bool>,
    cv: Condvar,
    handle: Mutex<Option<Thread>>,
}

impl Slot {
    fn new() -> Self {
        Self { runnable: Mutex::new(false), cv: Condvar::new(), handle: Mutex::new(None) }
    }

    fn park_until_runnable(&self) {
        let mut g = self.runnable.lock().unwrap();
        while !*g {
            g = self.cv.wait(g).unwrap();
        }
    }

    fn make_runnable(&self) {
        *self.runnable.lock().unwrap() = true;
        self.cv.notify_one();
    }

    fn make_unrunnable(&self) {
        *self.runnable.lock().unwrap() = false;
    }
}

struct TestPort {
    slots: Mutex<Vec<&'static Slot>>,
    cpu_lock_depth: std::sync::atomic::AtomicUsize,
}

// Safety: all mutable state is behind `Mutex`/atomics.
unsafe impl Sync for TestPort {}

unsafe impl Port for TestPort {
    fn initialize_stack(&self, init: StackInit) -> StackPointer {
        let slot: &'static Slot = Box::leak(Box::new(Slot::new()));
        let idx = {
            let mut slots = self.slots.lock().unwrap();
            slots.push(slot);
            slots.len() - 1
        };

        let entry = init.entry;
        let arg = init.arg;
        let handle = thread::Builder::new()
            .name(format!("rt-kernel-sim-{idx}"))
            .spawn(move || {
                slot.park_until_runnable();
                entry(arg);
            })
            .expect("failed to spawn simulated hardware thread");
        *slot.handle.lock().unwrap() = Some(handle.thread().clone());
        // Drop the join handle: test threads run for the lifetime of the
        // test process and are never joined, mirroring how real hardware
        // threads never "join" either.
        std::mem::forget(handle);

        StackPointer(idx)
    }

    fn request_context_switch(&self) {
        // The kernel has already updated its own "current thread" state
        // before calling this; the actual park/unpark pair happens in
        // `switch_to`, invoked by `task::dispatch` right after this
        // returns. This method exists, in a real port, to pend a PendSV-
        // style exception; here it is a no-op because our scheduler calls
        // `switch_to` synchronously instead of waiting for an
        // exception-return boundary.
    }

    fn first_switch_to(&self, sp: StackPointer) -> ! {
        let slots = self.slots.lock().unwrap();
        slots[sp.0].make_runnable();
        drop(slots);
        // The boot thread parks forever; it has no further role once the
        // first simulated thread is running.
        loop {
            thread::park();
        }
    }

    unsafe fn try_enter_cpu_lock(&self) -> bool {
        use std::sync::atomic::Ordering;
        // Single global kernel lock: modeled as a simple re-entrancy
        // counter rather than a real mutex, since at most one OS thread is
        // ever runnable at a time by this port's own invariant.
        let prev = self.cpu_lock_depth.fetch_add(1, Ordering::AcqRel);
        prev == 0
    }

    unsafe fn leave_cpu_lock(&self) {
        use std::sync::atomic::Ordering;
        self.cpu_lock_depth.fetch_sub(1, Ordering::AcqRel);
    }

    fn is_cpu_lock_active(&self) -> bool {
        self.cpu_lock_depth.load(std::sync::atomic::Ordering::Acquire) > 0
    }

    fn is_task_context(&self) -> bool {
        true
    }
}

impl TestPort {
    /// Park the calling OS thread (the previously-current simulated
    /// thread) and unpark `to`'s OS thread. Called by `task::dispatch`
    /// after it has updated the kernel's own notion of the current
    /// thread and dropped the kernel lock.
    pub fn switch_to(&self, from: Option<StackPointer>, to: StackPointer) {
        let slots = self.slots.lock().unwrap();
        slots[to.0].make_runnable();
        if let Some(from) = from {
            slots[from.0].make_unrunnable();
        }
        drop(slots);
        if let Some(from) = from {
            let slot = self.slots.lock().unwrap()[from.0];
            slot.park_until_runnable();
        }
    }
}

static PORT: OnceLock<TestPort> = OnceLock::new();

fn test_port() -> &'static TestPort {
    PORT.get_or_init(|| TestPort {
        slots: Mutex::new(Vec::new()),
        cpu_lock_depth: std::sync::atomic::AtomicUsize::new(0),
    })
}

/// Returns the process-wide test port, initializing it on first use.
pub fn port() -> &'static dyn Port {
    test_port()
}

/// Returns the test port's `switch_to` entry point, for use by
/// `task::dispatch`.
pub fn switch_to(from: Option<StackPointer>, to: StackPointer) {
    test_port().switch_to(from, to)
}

/// Resets all test port state. Call at the start of each `#[test]` that
/// boots a fresh kernel instance, since the port (and the kernel's own
/// statics) are process-global.
pub fn reset() {
    let mut slots = test_port().slots.lock().unwrap();
    slots.clear();
    test_port().cpu_lock_depth.store(0, std::sync::atomic::Ordering::Release);
}
