//! Asynchronous catcher delivery (spec §4.8, scenario §8.5): T1 installs a
//! handler for signal 7 and blocks in `sleep_for`; T2, at lower priority,
//! `generate`s signal 7 against T1 with no payload. Generating wakes T1
//! immediately (it outranks T2), and the handler must run on T1's own
//! stack — interrupting its sleep — before `sleep_for` itself returns,
//! with the pending bit cleared once the handler has run.

mod common;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration as StdDuration;

use rt_kernel::boot;
use rt_kernel::error::PollError;
use rt_kernel::klock;
use rt_kernel::sched::{self, SchedulingPolicy};
use rt_kernel::signal::{self, SignalInfo};
use rt_kernel::task::{self, JoinPolicy, Tcb};

const T1_PRIO: u8 = 9;
const T2_PRIO: u8 = 3;
const SIGNAL_NUMBER: u8 = 7;

static HANDLER_RAN: AtomicBool = AtomicBool::new(false);
static HANDLER_SIGNAL: AtomicU8 = AtomicU8::new(255);
static HANDLER_RAN_BEFORE_SLEEP_RETURNED: AtomicBool = AtomicBool::new(false);
static ACCEPT_AFTER_DELIVERY_WAS_BUSY: AtomicBool = AtomicBool::new(false);
static DONE: AtomicBool = AtomicBool::new(false);

static T1_TCB: Tcb = Tcb::new("t1", T1_PRIO, SchedulingPolicy::Fifo, JoinPolicy::Detached, t1_entry, 0);
static T2_TCB: Tcb = Tcb::new("t2", T2_PRIO, SchedulingPolicy::Fifo, JoinPolicy::Detached, t2_entry, 0);
static IDLE_TCB: Tcb = boot::new_idle_tcb();

fn terminate_self() -> ! {
    let lock = klock::lock_cpu();
    let me = sched::current_or_fatal(&lock);
    task::terminate(lock, me)
}

fn handle_signal_7(info: SignalInfo) {
    HANDLER_SIGNAL.store(info.signal_number, Ordering::SeqCst);
    HANDLER_RAN.store(true, Ordering::SeqCst);
}

fn t1_entry(_arg: usize) {
    signal::set_catcher(SIGNAL_NUMBER, handle_signal_7, 0).expect("set_catcher must succeed");
    // T2 cannot run until this actually blocks (T1 outranks it), so the
    // catcher is still unfired at this point.
    task::sleep_for(10_000);
    HANDLER_RAN_BEFORE_SLEEP_RETURNED.store(HANDLER_RAN.load(Ordering::SeqCst), Ordering::SeqCst);
    ACCEPT_AFTER_DELIVERY_WAS_BUSY
        .store(signal::accept(SIGNAL_NUMBER) == Err(PollError::Busy), Ordering::SeqCst);
    DONE.store(true, Ordering::SeqCst);
    terminate_self();
}

fn t2_entry(_arg: usize) {
    signal::generate(&T1_TCB, SIGNAL_NUMBER).expect("generate must succeed");
    terminate_self();
}

fn init_all() {
    task::activate(&T1_TCB, common::leak_stack(32 * 1024));
    task::activate(&T2_TCB, common::leak_stack(32 * 1024));
}

#[test]
fn generated_signal_runs_installed_catcher_on_resume() {
    let _guard = common::serial();
    HANDLER_RAN.store(false, Ordering::SeqCst);
    HANDLER_SIGNAL.store(255, Ordering::SeqCst);
    HANDLER_RAN_BEFORE_SLEEP_RETURNED.store(false, Ordering::SeqCst);
    ACCEPT_AFTER_DELIVERY_WAS_BUSY.store(false, Ordering::SeqCst);
    DONE.store(false, Ordering::SeqCst);
    common::boot_kernel(&[init_all], &IDLE_TCB);
    common::wait_until(|| DONE.load(Ordering::SeqCst), StdDuration::from_secs(5));

    assert!(HANDLER_RAN.load(Ordering::SeqCst), "installed catcher never ran");
    assert_eq!(HANDLER_SIGNAL.load(Ordering::SeqCst), SIGNAL_NUMBER);
    assert!(
        HANDLER_RAN_BEFORE_SLEEP_RETURNED.load(Ordering::SeqCst),
        "catcher must run on T1's own stack before its interrupted sleep returns"
    );
    assert!(
        ACCEPT_AFTER_DELIVERY_WAS_BUSY.load(Ordering::SeqCst),
        "pending bit must be cleared once the catcher has consumed the signal"
    );
}
