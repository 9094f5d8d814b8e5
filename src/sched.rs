//! The scheduler: ready queues and dispatch decisions (spec §4.3,
//! component L3).
//!
//! Grounded on the teacher's `task/readyqueue.rs` (`BitmapQueue`,
//! `ScheduleDecision`) and `utils/prio_bitmap.rs`, collapsed from a
//! const-generic, `Traits`-parameterized design to one concrete
//! 256-priority-level instantiation (spec §3 fixes `Priority` to `u8`).
use crate::klock::{self, CpuLockCell, CpuLockGuard};
use crate::list::List;
use crate::task::{ReadyRole, Tcb, ThreadState};
use crate::utils::PrioBitmap;

/// Thread priority. 0 is lowest, 255 is highest (spec §3).
pub type Priority = u8;

/// How a thread competes with others at the same effective priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Runs until it blocks, sleeps, terminates, or is preempted by a
    /// higher-priority thread; never preempted by an equal-priority one.
    Fifo,
    /// Additionally time-sliced against other `RoundRobin` threads at the
    /// same effective priority, with the given quantum in ticks.
    RoundRobin { quantum: crate::tick::Tick },
}

struct ReadyQueues {
    bitmap: PrioBitmap,
    queues: [List<Tcb, ReadyRole>; 256],
}

impl ReadyQueues {
    const fn new() -> Self {
        const EMPTY: List<Tcb, ReadyRole> = List::new();
        Self { bitmap: PrioBitmap::new(), queues: [EMPTY; 256] }
    }
}

static READY: CpuLockCell<ReadyQueues> = CpuLockCell::new(ReadyQueues::new());

/// The thread presently running on this core, or `None` before boot /
/// while idling with nothing runnable (should not happen once the idle
/// thread, spec §4.11, has been created — it is always ready at priority
/// 0).
static CURRENT: CpuLockCell<Option<&'static Tcb>> = CpuLockCell::new(None);

pub fn current(lock: &CpuLockGuard) -> Option<&'static Tcb> {
    *CURRENT.read(&**lock)
}

/// Like [`current`], but halts instead of returning `None`. For call
/// sites (mutex/semaphore/condvar operations) that are only ever reached
/// from thread context, where a current thread always exists once the
/// scheduler has started.
pub fn current_or_fatal(lock: &CpuLockGuard) -> &'static Tcb {
    current(lock).unwrap_or_else(|| crate::error::fatal("no current thread"))
}

/// # Safety
/// Caller must ensure `tcb` genuinely is now the running thread (its
/// state has been updated to `Runnable` and it has been removed from the
/// ready queue).
pub(crate) fn set_current(lock: &mut CpuLockGuard, tcb: Option<&'static Tcb>) {
    *CURRENT.write(&mut **lock) = tcb;
}

/// Insert `tcb` into the ready queue at its current effective priority.
/// `tcb` must not already be in the ready queue.
pub fn make_ready(lock: &mut CpuLockGuard, tcb: &'static Tcb) {
    let pri = tcb.effective_priority();
    let rq = READY.write(&mut **lock);
    rq.queues[pri as usize].push_back(tcb);
    rq.bitmap.set(pri);
}

/// Remove `tcb` from the ready queue at `at_priority` (its effective
/// priority at the time it was inserted — callers must track this across
/// priority changes, see `reorder_ready`).
pub fn remove_ready(lock: &mut CpuLockGuard, tcb: &'static Tcb, at_priority: Priority) {
    let rq = READY.write(&mut **lock);
    rq.queues[at_priority as usize].remove(tcb);
    if rq.queues[at_priority as usize].is_empty() {
        rq.bitmap.clear(at_priority);
    }
}

/// Move `tcb` from `old_priority` to its current effective priority within
/// the ready queue, used after `set_priority`/priority-inheritance changes
/// its effective priority while it is Runnable.
pub fn reorder_ready(lock: &mut CpuLockGuard, tcb: &'static Tcb, old_priority: Priority) {
    let new_priority = tcb.effective_priority();
    if new_priority == old_priority {
        return;
    }
    remove_ready(lock, tcb, old_priority);
    make_ready(lock, tcb);
}

/// The highest occupied ready-queue priority, if any.
pub fn highest_ready_priority(lock: &CpuLockGuard) -> Option<Priority> {
    READY.read(&**lock).bitmap.highest()
}

/// Pop the highest-priority ready thread (FIFO among ties), if any.
pub fn pop_highest_ready(lock: &mut CpuLockGuard) -> Option<&'static Tcb> {
    let rq = READY.write(&mut **lock);
    let pri = rq.bitmap.highest()?;
    let tcb = rq.queues[pri as usize].pop_front().unwrap();
    if rq.queues[pri as usize].is_empty() {
        rq.bitmap.clear(pri);
    }
    Some(tcb)
}

/// Pop the next-highest-ready thread, make it current, and hand control to
/// it. The caller must have already arranged for `cur` to be wherever it
/// belongs (back on the ready queue if it should run again later, left off
/// entirely if it just blocked or terminated) — this only performs the
/// handoff itself. Shared tail of [`dispatch`], [`yield_now`], and
/// [`preempt_for_quantum_expiry`], so the two callers that also rotate
/// `cur` onto the ready queue can't each independently get the self-switch
/// case (`next == cur`, parking `cur` with no one left to wake it) wrong.
///
/// Consumes the lock: once this returns, the kernel lock has been
/// released (the port releases interrupts as part of completing the
/// switch).
fn perform_switch(mut lock: CpuLockGuard, cur: &'static Tcb) {
    let next = pop_highest_ready(&mut lock).expect("bitmap said a thread was ready");
    set_current(&mut lock, Some(next));

    let from_sp = Some(cur.stack_pointer());
    let to_sp = next.stack_pointer();
    drop(lock);

    #[cfg(any(test, feature = "std"))]
    crate::testport::switch_to(from_sp, to_sp);
    #[cfg(not(any(test, feature = "std")))]
    crate::port::current().request_context_switch();

    // Control resumes here once this call's own thread (`cur`, whichever
    // thread actually invoked `dispatch`/`yield_now`/`preempt_for_quantum_
    // expiry`) is current again — the one point a thread can rely on
    // running on its own stack, so it's the right place to run any
    // asynchronous signal catchers due (spec §4.8).
    crate::signal::deliver_pending_catchers();
}

/// Re-evaluate who should be running and, if it differs from the thread
/// that was running when the kernel lock was taken, perform the switch.
/// This is the sole place a context switch is initiated (spec §4.3: "the
/// kernel never switches away from a thread except through this
/// decision").
///
/// Consumes the lock: once this returns, the kernel lock has been
/// released (the port releases interrupts as part of completing, or not
/// performing, the switch).
pub fn dispatch(mut lock: CpuLockGuard) {
    let Some(cur) = current(&lock) else {
        // No thread has ever really run yet (called from a `boot::init`
        // initializer, or right after `reset_for_test`). There is no "from"
        // OS thread the port could hand control off from, so acting now
        // would pop a thread off the ready queue without ever actually
        // switching to it; `sched::start` performs the one real first
        // dispatch once boot finishes.
        drop(lock);
        return;
    };
    // A thread that called `dispatch` after blocking or terminating has
    // already moved its own state off `Runnable`; such a thread must
    // always be switched away from, regardless of priority — only a
    // still-`Runnable` `cur` can "win" and keep the CPU.
    let cur_runnable = matches!(cur.state(), ThreadState::Runnable);
    let next_priority = highest_ready_priority(&lock).map_or(-1i16, |p| p as i16);

    if cur_runnable {
        let cur_priority = cur.effective_priority() as i16;
        if next_priority <= cur_priority {
            // `cur` still has the highest priority; nothing to do.
            drop(lock);
            return;
        }
    } else if next_priority < 0 {
        crate::error::fatal("current thread is not runnable and no thread is ready");
    }

    if cur_runnable {
        // `cur` keeps running conceptually (it's still Runnable) but no
        // longer holds the CPU; put it back on the ready queue behind
        // other threads at its own priority.
        make_ready(&mut lock, cur);
    }
    perform_switch(lock, cur);
}

/// Move the calling thread to the tail of its own priority's ready queue
/// and let an equal-priority peer run next, if one is waiting (spec §4.3's
/// `yield`). A no-op if no such peer is currently ready — rotating `cur`
/// behind itself with nothing else to switch to would just hand the CPU
/// straight back after parking it pointlessly.
pub fn yield_now(lock: CpuLockGuard) {
    let mut lock = lock;
    let cur = current_or_fatal(&lock);
    let pri = cur.effective_priority();
    let peer_waiting = !READY.read(&*lock).queues[pri as usize].is_empty();
    if !peer_waiting {
        drop(lock);
        return;
    }
    make_ready(&mut lock, cur);
    perform_switch(lock, cur);
}

/// Rotate the current thread to the tail of its priority's ready queue on
/// round-robin quantum expiry (spec §4.3/§5), if a distinct
/// equal-or-higher-priority thread is actually ready to take the CPU. A
/// no-op otherwise, for the same self-switch reason as [`yield_now`].
pub(crate) fn preempt_for_quantum_expiry(lock: CpuLockGuard, cur: &'static Tcb) {
    let mut lock = lock;
    match highest_ready_priority(&lock) {
        Some(p) if p >= cur.effective_priority() => {
            make_ready(&mut lock, cur);
            perform_switch(lock, cur);
        }
        _ => drop(lock),
    }
}

/// Called once by `boot::init` to perform the very first dispatch, which
/// never returns (the boot/idle "thread" becomes just an OS-level parked
/// thread in the test port, or the reset vector's infinite loop on real
/// hardware).
pub fn start(lock: CpuLockGuard) -> ! {
    let mut lock = lock;
    let first = pop_highest_ready(&mut lock).expect("no thread ready at boot");
    set_current(&mut lock, Some(first));
    let sp = first.stack_pointer();
    drop(lock);
    crate::port::current().first_switch_to(sp)
}

/// Clear the ready queues and current-thread pointer. Used by
/// [`crate::boot::test_init`] so each test that boots a kernel starts from
/// a clean scheduler, since `READY`/`CURRENT` are process-global statics
/// shared by every `#[test]` in the same test binary.
#[cfg(any(test, feature = "std"))]
pub fn reset_for_test() {
    let mut lock = klock::lock_cpu();
    *READY.write(&mut *lock) = ReadyQueues::new();
    set_current(&mut lock, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_reflects_ready_queue_population() {
        let mut lock = klock::lock_cpu();
        assert_eq!(highest_ready_priority(&lock), None);
        drop(lock);
    }
}
