//! The kernel lock: a single process-wide critical section token.
//!
//! Grounded on the teacher's `klock.rs`, simplified from a
//! `Traits: PortThreading`-generic design (the teacher supports compiling
//! multiple independent kernel instances into one binary) down to one
//! concrete singleton, since this crate has exactly one kernel instance
//! per program (spec §3/§9 — "explicit process-wide state with an
//! `initialize` phase"). The underlying technique — a `tokenlock` singleton
//! token that statically proves "I hold the kernel lock" and gates access
//! to interior-mutable cells — is kept unchanged.
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::port::{self, Port};

pub struct CpuLockTag;

/// The key that "unlocks" [`CpuLockCell`].
pub type CpuLockToken = tokenlock::UnsyncSingletonToken<CpuLockTag>;
pub type CpuLockKeyhole = tokenlock::SingletonTokenId<CpuLockTag>;

/// A cell that can only be read or written while holding the kernel lock
/// (proven by possession of a [`CpuLockGuard`] or a borrow of one).
pub struct CpuLockCell<T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole>);

impl<T> CpuLockCell<T> {
    pub const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::new(), x))
    }
}

impl<T: fmt::Debug> fmt::Debug for CpuLockCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match try_lock_cpu() {
            Some(lock) => {
                let r = self.0.read(&*lock).fmt(f);
                drop(lock);
                r
            }
            None => f.write_str("CpuLockCell(<locked>)"),
        }
    }
}

impl<T> ops::Deref for CpuLockCell<T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Enter the kernel lock state (disabling interrupts via the port) and
/// return an RAII guard. Returns `None` if the kernel lock is already
/// active on this core, mirroring the teacher's `BadContext` on reentrant
/// `lock_cpu`.
pub fn try_lock_cpu() -> Option<CpuLockGuard> {
    // Safety: only the kernel calls this, and it immediately constructs the
    // unique `CpuLockGuard` that is allowed to exist while locked.
    if unsafe { port::current().try_enter_cpu_lock() } {
        Some(unsafe { assume_cpu_lock() })
    } else {
        None
    }
}

/// Like [`try_lock_cpu`] but halts the system instead of returning `None`,
/// for call sites that have already established (by context, e.g. "this
/// only runs from `boot::init` before the scheduler starts") that the lock
/// cannot already be held.
pub fn lock_cpu() -> CpuLockGuard {
    try_lock_cpu().unwrap_or_else(|| crate::error::fatal("kernel lock re-entered"))
}

/// # Safety
/// The kernel lock must actually be active, and no other `CpuLockGuard`
/// may exist.
unsafe fn assume_cpu_lock() -> CpuLockGuard {
    CpuLockGuard {
        token: unsafe { CpuLockToken::new_unchecked() },
    }
}

/// RAII guard for the kernel lock. Dropping it re-enables interrupts
/// through the port. [`CpuLockTokenRefMut`] borrows can be taken from it to
/// pass "proof of the lock" into functions without moving the guard.
pub struct CpuLockGuard {
    token: CpuLockToken,
}

impl CpuLockGuard {
    pub fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_> {
        self.token.borrow_mut()
    }
}

impl Drop for CpuLockGuard {
    fn drop(&mut self) {
        // Safety: the kernel lock is active and we are the unique guard.
        unsafe { port::current().leave_cpu_lock() };
    }
}

impl ops::Deref for CpuLockGuard {
    type Target = CpuLockToken;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl ops::DerefMut for CpuLockGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// Equivalent to `&'a mut CpuLockGuard` but does not consume stack space for
/// a second pointer indirection. Always prefer this in function signatures;
/// call [`CpuLockGuard::borrow_mut`] to obtain one. Reborrowing is manual
/// (unlike `&mut T`), matching the teacher's documented caveat.
pub type CpuLockTokenRefMut<'a> = tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag>;
