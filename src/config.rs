//! Build-time tuning knobs.
//!
//! In the teacher crate this crate is derived from, these values are wired
//! together at compile time by a separate static-configuration ("bind
//! graph") crate. That system exists to connect independently-compiled
//! application/kernel/port crates; since this crate has no such split, the
//! same knobs are plain `const`s here, overridable only through Cargo
//! features for the on/off switches.

/// Highest signal number supported. Signals are numbered `0..=MAX_SIGNAL_NUMBER`.
pub const MAX_SIGNAL_NUMBER: u8 = 31;

/// Maximum recursion depth tracked by a `Recursive` mutex before
/// `ResultCode::WouldOverflow` is returned from `lock`.
pub const RECURSIVE_MUTEX_MAX_RECURSION: u32 = 65535;

/// Maximum length of a priority-inheritance boost chain walked by
/// [`crate::mutex`] before the kernel treats the configuration as corrupt
/// (see DESIGN.md, Open Question 2). A real program holding more than this
/// many nested mutexes simultaneously is a configuration error, not a
/// runtime condition to recover from.
pub const PRIORITY_INHERITANCE_MAX_CHAIN: usize = 16;

/// Informational only: the crate counts in [`crate::Tick`]s, not wall time.
/// A port may choose to interpret one tick as `1_000 / TICK_FREQUENCY_HZ` ms.
pub const TICK_FREQUENCY_HZ: u32 = 1000;

/// Default round-robin time slice, in ticks, used by
/// [`crate::sched`] when a thread is created with
/// [`crate::sched::SchedulingPolicy::RoundRobin`] and no explicit quantum.
pub const ROUND_ROBIN_DEFAULT_QUANTUM: u64 = 10;

/// Whether signal support is compiled in.
pub const SIGNALS_ENABLED: bool = cfg!(feature = "signals");

/// Whether detached-thread support is compiled in.
pub const THREAD_DETACH_ENABLED: bool = cfg!(feature = "thread_detach");
