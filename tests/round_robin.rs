//! Round-robin time-slicing between two equal-priority threads (spec §4.3,
//! §5): neither thread ever blocks on its own, so without genuine quantum
//! rotation the first-activated thread would simply run to completion
//! before its peer ever got the CPU. Each thread calls `task::tick_hook`
//! itself once per logical tick (standing in for a hardware tick
//! interrupt that would otherwise preempt whichever thread happens to be
//! running), so the rotation this exercises is the kernel's own
//! quantum-expiry bookkeeping, not timing luck.

mod common;

use std::sync::Mutex;
use std::time::Duration as StdDuration;

use rt_kernel::boot;
use rt_kernel::klock;
use rt_kernel::sched::{self, SchedulingPolicy};
use rt_kernel::task::{self, JoinPolicy, Tcb};

const PRIORITY: u8 = 5;
const QUANTUM: u64 = 3;
const QUANTA_PER_THREAD: u64 = 3;
const TOTAL_TICKS: u64 = QUANTUM * QUANTA_PER_THREAD;

static EVENTS: Mutex<Vec<char>> = Mutex::new(Vec::new());

static A_TCB: Tcb = Tcb::new(
    "a",
    PRIORITY,
    SchedulingPolicy::RoundRobin { quantum: QUANTUM },
    JoinPolicy::Detached,
    worker_entry,
    0,
);
static B_TCB: Tcb = Tcb::new(
    "b",
    PRIORITY,
    SchedulingPolicy::RoundRobin { quantum: QUANTUM },
    JoinPolicy::Detached,
    worker_entry,
    1,
);
static IDLE_TCB: Tcb = boot::new_idle_tcb();

fn terminate_self() -> ! {
    let lock = klock::lock_cpu();
    let me = sched::current_or_fatal(&lock);
    task::terminate(lock, me)
}

fn worker_entry(id: usize) {
    let label = if id == 0 { 'A' } else { 'B' };
    for _ in 0..TOTAL_TICKS {
        EVENTS.lock().unwrap().push(label);
        task::tick_hook();
    }
    terminate_self();
}

fn init_all() {
    task::activate(&A_TCB, common::leak_stack(32 * 1024));
    task::activate(&B_TCB, common::leak_stack(32 * 1024));
}

#[test]
fn equal_priority_round_robin_threads_actually_rotate() {
    let _guard = common::serial();
    EVENTS.lock().unwrap().clear();
    common::boot_kernel(&[init_all], &IDLE_TCB);
    common::wait_until(
        || EVENTS.lock().unwrap().len() as u64 == 2 * TOTAL_TICKS,
        StdDuration::from_secs(5),
    );

    let events = EVENTS.lock().unwrap().clone();
    let a_count = events.iter().filter(|&&c| c == 'A').count() as u64;
    let b_count = events.iter().filter(|&&c| c == 'B').count() as u64;
    assert_eq!(a_count, TOTAL_TICKS);
    assert_eq!(b_count, TOTAL_TICKS);

    // `A` is activated first and so runs first; without real quantum
    // rotation it would run every tick to completion before `B` ever got
    // the CPU, putting `B`'s first appearance after `A`'s last one.
    let first_b = events.iter().position(|&c| c == 'B').unwrap();
    let last_a = events.iter().rposition(|&c| c == 'A').unwrap();
    assert!(
        first_b < last_a,
        "threads never interleaved — round robin did not rotate the quantum (events: {events:?})"
    );
    // Rotation must happen at quantum boundaries, not sooner: the first
    // `QUANTUM` events must all belong to `A`.
    assert!(events.iter().take(QUANTUM as usize).all(|&c| c == 'A'));
}
