//! `sched::yield_now` (spec §4.3's `yield`): two equal-priority `Fifo`
//! threads, neither of which would ever preempt the other on its own,
//! hand the CPU back and forth purely by calling `yield_now` explicitly.
//! Also checks the documented no-op case: yielding with no ready peer at
//! the same priority leaves the caller running uninterrupted.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use rt_kernel::boot;
use rt_kernel::klock;
use rt_kernel::sched::{self, SchedulingPolicy};
use rt_kernel::task::{self, JoinPolicy, Tcb};

const PRIORITY: u8 = 5;
const ROUNDS: usize = 4;

static EVENTS: Mutex<Vec<char>> = Mutex::new(Vec::new());
static DONE: AtomicBool = AtomicBool::new(false);

static A_TCB: Tcb =
    Tcb::new("a", PRIORITY, SchedulingPolicy::Fifo, JoinPolicy::Detached, a_entry, 0);
static B_TCB: Tcb =
    Tcb::new("b", PRIORITY, SchedulingPolicy::Fifo, JoinPolicy::Detached, b_entry, 0);
static IDLE_TCB: Tcb = boot::new_idle_tcb();

fn terminate_self() -> ! {
    let lock = klock::lock_cpu();
    let me = sched::current_or_fatal(&lock);
    task::terminate(lock, me)
}

fn a_entry(_arg: usize) {
    for _ in 0..ROUNDS {
        EVENTS.lock().unwrap().push('A');
        sched::yield_now(klock::lock_cpu());
    }
    terminate_self();
}

fn b_entry(_arg: usize) {
    for _ in 0..ROUNDS {
        EVENTS.lock().unwrap().push('B');
        sched::yield_now(klock::lock_cpu());
    }
    DONE.store(true, Ordering::SeqCst);
    terminate_self();
}

fn init_all() {
    task::activate(&A_TCB, common::leak_stack(32 * 1024));
    task::activate(&B_TCB, common::leak_stack(32 * 1024));
}

#[test]
fn equal_priority_fifo_threads_alternate_via_explicit_yield() {
    let _guard = common::serial();
    EVENTS.lock().unwrap().clear();
    DONE.store(false, Ordering::SeqCst);
    common::boot_kernel(&[init_all], &IDLE_TCB);
    common::wait_until(|| DONE.load(Ordering::SeqCst), StdDuration::from_secs(5));

    let events = EVENTS.lock().unwrap().clone();
    assert_eq!(events, vec!['A', 'B', 'A', 'B', 'A', 'B', 'A', 'B']);
}

#[test]
fn yield_with_no_ready_peer_is_a_no_op() {
    let _guard = common::serial();
    static SOLO_TCB: Tcb =
        Tcb::new("solo", PRIORITY, SchedulingPolicy::Fifo, JoinPolicy::Detached, solo_entry, 0);
    static SOLO_IDLE_TCB: Tcb = boot::new_idle_tcb();
    static SOLO_RAN: AtomicBool = AtomicBool::new(false);

    fn solo_entry(_arg: usize) {
        // No other thread at this priority is ready; yielding must return
        // without ever switching away.
        sched::yield_now(klock::lock_cpu());
        SOLO_RAN.store(true, Ordering::SeqCst);
        let lock = klock::lock_cpu();
        let me = sched::current_or_fatal(&lock);
        task::terminate(lock, me)
    }

    fn init_solo() {
        task::activate(&SOLO_TCB, common::leak_stack(32 * 1024));
    }

    common::boot_kernel(&[init_solo], &SOLO_IDLE_TCB);
    common::wait_until(|| SOLO_RAN.load(Ordering::SeqCst), StdDuration::from_secs(5));
}
