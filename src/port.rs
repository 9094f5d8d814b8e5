//! The external architecture-port interface (spec §6).
//!
//! Everything architecture-specific — context switching, stack layout,
//! interrupt masking, the tick source, FPU lazy-save policy — is explicitly
//! out of scope for this crate (spec §1 Non-goals) and is provided instead
//! by a collaborator implementing [`Port`]. This crate never implements
//! `Port` against real hardware; the only implementation in this source
//! tree is the `#[cfg(test)]` std-thread-based [`crate::testport`], used
//! exclusively by our own test suite.
//!
//! Grounded on the teacher's `PortThreading` trait (surveyed in
//! `r3_core::kernel::raw` and used throughout `klock.rs`/`task.rs`), but
//! stripped to exactly the operations this kernel's scheduler and timer
//! engine need to call into, without the teacher's additional
//! interrupt-line-priority-configuration and FPU-lazy-context surface
//! (those back r3's interrupt controller / cfg-table features, which are
//! outside this spec).

/// A thread's initial entry point, combined with the stack it runs on.
/// `initialize_stack` prepares a stack image such that, the first time the
/// port switches to this thread, control transfers to `entry(arg)`.
pub struct StackInit {
    pub stack: &'static mut [u8],
    pub entry: fn(usize),
    pub arg: usize,
}

/// The architecture-specific collaborator a concrete deployment must
/// supply. Exactly one implementor exists at link time (spec §9 —
/// "explicit process-wide state", not per-instance generics), obtained
/// through [`current`].
///
/// # Safety
/// Implementors must ensure `enable_interrupts`/`disable_interrupts` nest
/// correctly (a matched pair restores the prior mask) and that
/// `request_context_switch` only takes effect once the kernel lock is
/// released, never synchronously.
pub unsafe trait Port: Sync {
    /// Write the initial register/stack frame so that switching to this
    /// thread for the first time invokes `init.entry(init.arg)`.
    fn initialize_stack(&self, init: StackInit) -> StackPointer;

    /// Request that the port perform a context switch to the
    /// highest-priority ready thread at the next opportunity (typically on
    /// return from the current exception/interrupt, or immediately if
    /// called from thread context with interrupts enabled).
    fn request_context_switch(&self);

    /// Transfer control to `sp` for the very first time, never returning.
    /// Used once by [`crate::boot::init`] to start the scheduler.
    fn first_switch_to(&self, sp: StackPointer) -> !;

    /// Enter the kernel lock: mask interrupts up to the priority level that
    /// can touch kernel data structures. Nestable; returns whether the
    /// lock was newly acquired (i.e. interrupts were not already masked at
    /// kernel level).
    ///
    /// # Safety
    /// Must only be called by [`crate::klock`].
    unsafe fn try_enter_cpu_lock(&self) -> bool;

    /// Leave the kernel lock entered by a matching [`Port::try_enter_cpu_lock`].
    ///
    /// # Safety
    /// Must only be called by [`crate::klock`], and only when the lock is
    /// actually held.
    unsafe fn leave_cpu_lock(&self);

    /// Whether the kernel lock is currently held on this core.
    fn is_cpu_lock_active(&self) -> bool;

    /// Whether the caller is running in thread context (as opposed to
    /// interrupt/exception context).
    fn is_task_context(&self) -> bool;
}

/// Opaque, port-defined stack pointer value threaded back into
/// `first_switch_to`/the context-switch machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPointer(pub usize);

use core::sync::atomic::{AtomicBool, Ordering};

static REGISTERED: AtomicBool = AtomicBool::new(false);
static mut PORT: Option<&'static dyn Port> = None;

/// Register the process-wide port implementation. Must be called exactly
/// once, before [`crate::boot::init`], by the integrator (board support
/// code, or the `#[cfg(test)]` test harness), before interrupts are
/// enabled or any other thread can call [`current`]. Mirrors the teacher's
/// approach of fixing the kernel to a single concrete `Traits` type at
/// compile time, just deferred to a one-time runtime registration instead
/// of a generic parameter, since this crate has no generic kernel
/// instantiation to hang the port on.
pub fn register(port: &'static dyn Port) {
    if REGISTERED.swap(true, Ordering::AcqRel) {
        crate::error::fatal("port::register called more than once");
    }
    // Safety: single-threaded at this point by contract (pre-boot), and
    // `REGISTERED` ensures this write happens exactly once.
    unsafe { PORT = Some(port) };
}

/// Returns the single process-wide port implementation.
///
/// # Panics
/// Halts the system (via [`crate::error::fatal`]) if called before
/// [`register`].
pub fn current() -> &'static dyn Port {
    #[cfg(any(test, feature = "std"))]
    {
        crate::testport::port()
    }
    #[cfg(not(any(test, feature = "std")))]
    {
        // Safety: `PORT` is written exactly once, before the scheduler
        // (and therefore before any concurrent reader) starts.
        match unsafe { PORT } {
            Some(p) => p,
            None => crate::error::fatal("no port registered"),
        }
    }
}
