//! Call-once synchronization (spec §4.10, component L10).
//!
//! No teacher file covers this; built directly from the
//! [`crate::mutex::MutexCb`] and [`crate::condvar::CondVar`] primitives
//! already implemented, the same way `std::sync::Once` is classically
//! described in terms of a mutex and a condition variable rather than a
//! dedicated scheduler hook.
use core::cell::Cell;

use crate::condvar::CondVar;
use crate::mutex::{Kind, MutexCb, Protocol};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnceState {
    NotStarted,
    Running,
    Done,
}

pub struct Once {
    state: Cell<OnceState>,
    mutex: MutexCb,
    condvar: CondVar,
}

impl Once {
    pub const fn new() -> Self {
        Self {
            state: Cell::new(OnceState::NotStarted),
            mutex: MutexCb::new(Protocol::None, Kind::Normal),
            condvar: CondVar::new(),
        }
    }

    /// Run `f` exactly once across however many threads call
    /// `call_once` on this `Once`, regardless of which thread "wins" the
    /// race to run it. Threads that lose the race block until the winner
    /// finishes before returning.
    pub fn call_once(&'static self, f: impl FnOnce()) {
        self.mutex.lock().unwrap_or_else(|_| crate::error::fatal("Once's own mutex is poisoned"));
        match self.state.get() {
            OnceState::Done => {
                self.unlock();
            }
            OnceState::Running => {
                while !matches!(self.state.get(), OnceState::Done) {
                    self.condvar
                        .wait(&self.mutex)
                        .unwrap_or_else(|_| crate::error::fatal("Once wait interrupted"));
                }
                self.unlock();
            }
            OnceState::NotStarted => {
                self.state.set(OnceState::Running);
                self.unlock();
                f();
                self.mutex.lock().unwrap_or_else(|_| crate::error::fatal("Once's own mutex is poisoned"));
                self.state.set(OnceState::Done);
                self.condvar.notify_all();
                self.unlock();
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state.get(), OnceState::Done)
    }

    fn unlock(&'static self) {
        self.mutex.unlock().unwrap_or_else(|_| crate::error::fatal("Once's own mutex is poisoned"));
    }
}

unsafe impl Sync for Once {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_once_is_not_completed() {
        static ONCE: Once = Once::new();
        assert!(!ONCE.is_completed());
    }
}
