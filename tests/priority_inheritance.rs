//! Classic priority-inheritance chain: a low-priority thread locks an
//! `Inherit` mutex, then itself activates a medium- and a high-priority
//! thread that each try to lock the same mutex and block. Every assertion
//! is taken by the *observing* thread reading its own
//! `Tcb::effective_priority`/`is_boosted` — never by the test harness
//! peeking at another thread's `Tcb` from outside the kernel lock
//! discipline — so the scenario is checked exactly the way spec §4.4
//! describes the protocol, without relying on any particular context-
//! switch count.

mod common;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration as StdDuration;

use rt_kernel::boot;
use rt_kernel::klock;
use rt_kernel::mutex::{Kind, MutexCb, Protocol};
use rt_kernel::sched::{self, SchedulingPolicy};
use rt_kernel::task::{self, JoinPolicy, Tcb};

const LOW_PRIO: u8 = 1;
const MED_PRIO: u8 = 5;
const HIGH_PRIO: u8 = 9;

static MUTEX: MutexCb = MutexCb::new(Protocol::Inherit, Kind::Normal);

static LOW_AFTER_MED: AtomicU8 = AtomicU8::new(255);
static LOW_AFTER_HIGH: AtomicU8 = AtomicU8::new(255);
static LOW_AFTER_UNLOCK: AtomicU8 = AtomicU8::new(255);
static LOW_BOOSTED_WHILE_HELD: AtomicBool = AtomicBool::new(false);
static MED_OBSERVED: AtomicU8 = AtomicU8::new(255);
static HIGH_OBSERVED: AtomicU8 = AtomicU8::new(255);
static DONE: AtomicBool = AtomicBool::new(false);

static HIGH_TCB: Tcb =
    Tcb::new("high", HIGH_PRIO, SchedulingPolicy::Fifo, JoinPolicy::Detached, high_entry, 0);
static MED_TCB: Tcb =
    Tcb::new("med", MED_PRIO, SchedulingPolicy::Fifo, JoinPolicy::Detached, med_entry, 0);
static LOW_TCB: Tcb =
    Tcb::new("low", LOW_PRIO, SchedulingPolicy::Fifo, JoinPolicy::Detached, low_entry, 0);
static IDLE_TCB: Tcb = boot::new_idle_tcb();

fn terminate_self() -> ! {
    let lock = klock::lock_cpu();
    let me = sched::current_or_fatal(&lock);
    task::terminate(lock, me)
}

fn low_entry(_arg: usize) {
    MUTEX.lock().expect("low: lock uncontended");

    // Activating a higher-priority thread immediately preempts us, so by
    // the time `activate` returns, `med_entry` has already tried to lock
    // `MUTEX`, blocked, and boosted us to its priority.
    task::activate(&MED_TCB, common::leak_stack(32 * 1024));
    LOW_AFTER_MED.store(LOW_TCB.effective_priority(), Ordering::SeqCst);

    task::activate(&HIGH_TCB, common::leak_stack(32 * 1024));
    LOW_AFTER_HIGH.store(LOW_TCB.effective_priority(), Ordering::SeqCst);
    LOW_BOOSTED_WHILE_HELD.store(LOW_TCB.is_boosted(), Ordering::SeqCst);

    MUTEX.unlock().expect("low: unlock");
    // Control only returns here once we're rescheduled again (`unlock`
    // handed the mutex straight to `high_entry`, which preempted us); by
    // then our own boost is long gone since we no longer own the mutex.
    LOW_AFTER_UNLOCK.store(LOW_TCB.effective_priority(), Ordering::SeqCst);
    DONE.store(true, Ordering::SeqCst);
    terminate_self();
}

fn high_entry(_arg: usize) {
    MUTEX.lock().expect("high: lock contended");
    HIGH_OBSERVED.store(HIGH_TCB.effective_priority(), Ordering::SeqCst);
    MUTEX.unlock().expect("high: unlock");
    terminate_self();
}

fn med_entry(_arg: usize) {
    MUTEX.lock().expect("med: lock contended");
    MED_OBSERVED.store(MED_TCB.effective_priority(), Ordering::SeqCst);
    MUTEX.unlock().expect("med: unlock");
    terminate_self();
}

fn init_all() {
    task::activate(&LOW_TCB, common::leak_stack(32 * 1024));
}

#[test]
fn owner_boosts_to_highest_waiter_and_drops_back_on_unlock() {
    let _guard = common::serial();
    DONE.store(false, Ordering::SeqCst);
    common::boot_kernel(&[init_all], &IDLE_TCB);
    common::wait_until(|| DONE.load(Ordering::SeqCst), StdDuration::from_secs(5));

    assert_eq!(LOW_AFTER_MED.load(Ordering::SeqCst), MED_PRIO);
    assert_eq!(LOW_AFTER_HIGH.load(Ordering::SeqCst), HIGH_PRIO);
    assert!(LOW_BOOSTED_WHILE_HELD.load(Ordering::SeqCst));
    assert_eq!(LOW_AFTER_UNLOCK.load(Ordering::SeqCst), LOW_PRIO);
    // `high_entry` inherits the mutex directly from `low_entry`'s unlock
    // (it's the highest-priority waiter); nothing is left waiting on it by
    // the time it locks, so it runs at its own, unboosted priority.
    assert_eq!(HIGH_OBSERVED.load(Ordering::SeqCst), HIGH_PRIO);
    assert_eq!(MED_OBSERVED.load(Ordering::SeqCst), MED_PRIO);
}
