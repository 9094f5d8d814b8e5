//! Shared scaffolding for the scenario tests in this directory.
//!
//! Every test here boots a real kernel instance backed by
//! [`rt_kernel::testport`] (one real `std::thread` per simulated kernel
//! thread, with at most one unparked at a time) and drives it to a
//! verifiable end state. `rt_kernel`'s scheduler/ready-queue/timeout-list
//! statics are process-global, so every `#[test]` in a binary that uses
//! this module must run under [`serial`]'s guard rather than relying on
//! `cargo test`'s default parallel-threads execution.
#![allow(dead_code)]

use std::sync::Mutex;
use std::time::{Duration as StdDuration, Instant};

use rt_kernel::boot;
use rt_kernel::task::Tcb;

/// Held for the duration of every test in this binary. `rt_kernel`'s kernel
/// state (ready queues, current-thread pointer, timeout/timer lists) is
/// process-global, so two `#[test]` functions booting a kernel at the same
/// time would corrupt each other's run.
static SERIAL: Mutex<()> = Mutex::new(());

/// Acquire the cross-test lock for the live of the returned guard.
pub fn serial() -> std::sync::MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// Leak a zeroed buffer for use as a thread's stack. `testport`'s
/// `initialize_stack` never reads or writes stack memory — each simulated
/// thread actually runs on its own `std::thread`, so the buffer's size and
/// contents are irrelevant, only that it outlives the thread.
pub fn leak_stack(size: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; size].into_boxed_slice())
}

/// Reset every process-global kernel static and boot a fresh kernel
/// instance on a disposable background thread.
///
/// `boot::init` never returns: `sched::start` hands off to the first
/// scheduled thread and parks its caller forever inside the test port's
/// `first_switch_to`. Calling it on the test's own thread would hang the
/// test forever, so it always runs on a throwaway `std::thread::spawn`.
pub fn boot_kernel(initializers: &'static [fn()], idle: &'static Tcb) {
    boot::test_init(&[]);
    let idle_stack = leak_stack(4096);
    std::thread::spawn(move || {
        boot::init(initializers, idle, idle_stack);
    });
}

/// Poll `cond` until it returns `true`, panicking if it hasn't within
/// `timeout`. Thread entry points are plain `fn(usize)` with no closure
/// capture, so a test's kernel threads report progress through shared
/// `static` atomics/mutexes rather than a channel; this is how the test's
/// own thread observes them.
pub fn wait_until(mut cond: impl FnMut() -> bool, timeout: StdDuration) {
    let start = Instant::now();
    loop {
        if cond() {
            return;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {timeout:?}");
        }
        std::thread::sleep(StdDuration::from_millis(2));
    }
}

pub const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(5);
