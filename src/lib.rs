//! A preemptive, priority-based real-time concurrency kernel.
//!
//! This crate implements thread scheduling, mutual exclusion (mutexes with
//! priority inheritance and priority ceiling protocols), counting semaphores,
//! condition variables, bounded priority/FIFO message queues, POSIX-style
//! signals, and a drift-free software timer engine. It does not implement
//! anything architecture-specific: context switching, stack initialization,
//! interrupt masking, and the tick source are all provided by an external
//! [`port::Port`] implementation (see [`port`]).
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod config;
pub mod error;
pub mod list;
pub mod klock;
pub mod tick;
pub mod port;
pub mod sched;
pub mod task;
pub mod wait;
pub mod mutex;
pub mod semaphore;
pub mod condvar;
pub mod queue;
pub mod signal;
pub mod timer;
pub mod once;
pub mod boot;
pub mod utils;

#[cfg(any(test, feature = "std"))]
pub mod testport;

pub use error::ResultCode;
pub use tick::{Duration, Tick};
pub use sched::Priority;
