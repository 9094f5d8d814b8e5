//! Signal delivery's synchronous `sigwait`-style half (spec §4.8): a thread
//! blocked in `wait_any` is woken the moment a matching signal is queued
//! against it, and a signal queued before anyone waits for it is still
//! collected instead of lost. See `signal_catcher.rs` for the asynchronous
//! catcher-delivery half.

mod common;

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration as StdDuration;

use rt_kernel::boot;
use rt_kernel::klock;
use rt_kernel::sched::{self, SchedulingPolicy};
use rt_kernel::signal;
use rt_kernel::task::{self, JoinPolicy, Tcb};

const WAITER_PRIO: u8 = 5;
const RAISER_PRIO: u8 = 3;
const SIGNAL_NUMBER: u8 = 7;
const SIGNAL_VALUE: usize = 42;

static WAITER_TCB: Tcb =
    Tcb::new("waiter", WAITER_PRIO, SchedulingPolicy::Fifo, JoinPolicy::Detached, waiter_entry, 0);
static RAISER_TCB: Tcb =
    Tcb::new("raiser", RAISER_PRIO, SchedulingPolicy::Fifo, JoinPolicy::Detached, raiser_entry, 0);
static IDLE_TCB: Tcb = boot::new_idle_tcb();

static RECEIVED_SIGNAL: AtomicU8 = AtomicU8::new(255);
static RECEIVED_VALUE: AtomicUsize = AtomicUsize::new(0);
static DONE: AtomicBool = AtomicBool::new(false);

fn terminate_self() -> ! {
    let lock = klock::lock_cpu();
    let me = sched::current_or_fatal(&lock);
    task::terminate(lock, me)
}

fn waiter_entry(_arg: usize) {
    // WAITER outranks RAISER, so it runs first, finds nothing pending yet,
    // and genuinely blocks — RAISER only gets a turn once WAITER is off
    // the ready queue.
    let info =
        signal::wait_any(signal::signal_bit(SIGNAL_NUMBER)).expect("wait_any must not be interrupted");
    RECEIVED_SIGNAL.store(info.signal_number, Ordering::SeqCst);
    RECEIVED_VALUE.store(info.value, Ordering::SeqCst);
    DONE.store(true, Ordering::SeqCst);
    terminate_self();
}

fn raiser_entry(_arg: usize) {
    signal::queue(&WAITER_TCB, SIGNAL_NUMBER, SIGNAL_VALUE).expect("queue must succeed");
    terminate_self();
}

fn init_all() {
    task::activate(&WAITER_TCB, common::leak_stack(32 * 1024));
    task::activate(&RAISER_TCB, common::leak_stack(32 * 1024));
}

#[test]
fn waiter_blocked_in_wait_any_is_woken_by_raise() {
    let _guard = common::serial();
    DONE.store(false, Ordering::SeqCst);
    common::boot_kernel(&[init_all], &IDLE_TCB);
    common::wait_until(|| DONE.load(Ordering::SeqCst), StdDuration::from_secs(5));

    assert_eq!(RECEIVED_SIGNAL.load(Ordering::SeqCst), SIGNAL_NUMBER);
    assert_eq!(RECEIVED_VALUE.load(Ordering::SeqCst), SIGNAL_VALUE);
}

static PENDING_DONE: AtomicBool = AtomicBool::new(false);
static PENDING_OK: AtomicBool = AtomicBool::new(false);
static PENDING_TCB: Tcb =
    Tcb::new("pending", 1, SchedulingPolicy::Fifo, JoinPolicy::Detached, pending_entry, 0);
static PENDING_IDLE_TCB: Tcb = boot::new_idle_tcb();

fn pending_entry(_arg: usize) {
    // Queued against ourselves while we're still Runnable (not yet
    // waiting): `queue` only wakes a thread already in `WaitingForSignal`,
    // but the pending bit and queued info must still survive for the next
    // `wait_any_timeout` call to pick up without blocking at all.
    signal::queue(&PENDING_TCB, SIGNAL_NUMBER, SIGNAL_VALUE).expect("queue must succeed");
    let info = signal::wait_any_timeout(signal::signal_bit(SIGNAL_NUMBER), 1)
        .expect("signal was already pending, must not time out");
    PENDING_OK.store(
        info.signal_number == SIGNAL_NUMBER && info.value == SIGNAL_VALUE,
        Ordering::SeqCst,
    );
    PENDING_DONE.store(true, Ordering::SeqCst);
    terminate_self();
}

fn pending_init_all() {
    task::activate(&PENDING_TCB, common::leak_stack(32 * 1024));
}

#[test]
fn signal_raised_before_wait_is_not_lost() {
    let _guard = common::serial();
    PENDING_DONE.store(false, Ordering::SeqCst);
    PENDING_OK.store(false, Ordering::SeqCst);
    common::boot_kernel(&[pending_init_all], &PENDING_IDLE_TCB);
    common::wait_until(|| PENDING_DONE.load(Ordering::SeqCst), StdDuration::from_secs(5));

    assert!(PENDING_OK.load(Ordering::SeqCst));
}
