//! The kernel's POSIX-flavored error taxonomy.
//!
//! [`ResultCode`] is the single error currency returned by every fallible
//! kernel operation. Individual operations only ever return a *subset* of
//! `ResultCode`'s variants, so each operation module defines a small
//! sub-error enum (via [`define_suberror!`]) that captures just its own
//! possible outcomes and converts into `ResultCode` through `From`. This
//! keeps call sites precisely typed (`LockError` can't accidentally be
//! matched against `TimedOut`, which a plain `lock()` never returns) while
//! giving callers a single type to bubble up with `?` once they don't care
//! about the distinction anymore.
//!
//! Precondition violations (corrupted kernel state, an operation called
//! from a context it cannot legitimately recover from) are not
//! representable as `ResultCode` at all: they go through [`fatal`] instead,
//! which never returns.
use core::fmt;

/// The umbrella error type. See spec §7 for the full semantics of each
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// An argument was out of its valid range (bad priority, bad capacity,
    /// negative duration where one isn't allowed, ...).
    InvalidArgument,
    /// The operation could not complete without blocking and the caller
    /// asked for a non-blocking attempt (`try_*`).
    Busy,
    /// A bounded wait expired before the condition was satisfied.
    TimedOut,
    /// A blocked wait was interrupted by signal delivery before its
    /// condition was satisfied or it timed out.
    Interrupted,
    /// A counting resource (semaphore value, queue slot count) would have
    /// exceeded its configured maximum.
    WouldOverflow,
    /// The calling thread attempted to unlock, or otherwise act as owner
    /// of, a mutex it does not hold.
    NotOwner,
    /// A lock attempt was refused because it was statically determined to
    /// deadlock (recursive lock of a `Normal`/`ErrorChecking` mutex already
    /// held by the caller).
    Deadlock,
    /// The requested combination of options is not supported by this
    /// build/configuration.
    NotSupported,
    /// A fixed-capacity allocation (TCB pool, stack, signal queue slot)
    /// could not be satisfied.
    NoMemory,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultCode::InvalidArgument => "invalid argument",
            ResultCode::Busy => "resource busy",
            ResultCode::TimedOut => "timed out",
            ResultCode::Interrupted => "interrupted by signal",
            ResultCode::WouldOverflow => "would overflow",
            ResultCode::NotOwner => "not the owner",
            ResultCode::Deadlock => "would deadlock",
            ResultCode::NotSupported => "not supported",
            ResultCode::NoMemory => "no memory",
        };
        f.write_str(s)
    }
}

/// Halts the system. Used for precondition violations that indicate a
/// programming error or kernel corruption rather than a recoverable runtime
/// condition (spec §7: "precondition violations are Fatal").
#[cold]
#[inline(never)]
pub fn fatal(msg: &str) -> ! {
    panic!("fatal kernel error: {msg}")
}

macro_rules! define_suberror {
    (
        $( #[doc $( $doc:tt )*] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident ),* $(,)?
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $Name {
            $( $Variant ),*
        }

        impl From<$Name> for $crate::error::ResultCode {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }

        impl core::fmt::Display for $Name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                $crate::error::ResultCode::from(*self).fmt(f)
            }
        }
    };
}
pub(crate) use define_suberror;

define_suberror! {
    /// Errors from [`crate::mutex::Mutex::try_lock`].
    pub enum TryLockError {
        InvalidArgument,
        Busy,
        Deadlock,
        NotSupported,
    }
}

define_suberror! {
    /// Errors from [`crate::mutex::Mutex::lock`].
    pub enum LockError {
        InvalidArgument,
        Deadlock,
        NotSupported,
        Interrupted,
    }
}

define_suberror! {
    /// Errors from [`crate::mutex::Mutex::lock_timeout`].
    pub enum LockTimeoutError {
        InvalidArgument,
        Deadlock,
        NotSupported,
        TimedOut,
        Interrupted,
    }
}

define_suberror! {
    /// Errors from [`crate::mutex::Mutex::unlock`].
    pub enum UnlockError {
        NotOwner,
        InvalidArgument,
    }
}

define_suberror! {
    /// Errors from semaphore/queue `post`/`push` operations bounded by a
    /// maximum capacity.
    pub enum PostError {
        WouldOverflow,
    }
}

define_suberror! {
    /// Errors from blocking waits without a timeout (semaphore/condvar/queue).
    pub enum WaitError {
        Interrupted,
    }
}

define_suberror! {
    /// Errors from blocking waits with a timeout.
    pub enum WaitTimeoutError {
        TimedOut,
        Interrupted,
    }
}

define_suberror! {
    /// Errors from non-blocking poll attempts (`try_wait`, `try_push`, `try_pop`).
    pub enum PollError {
        Busy,
    }
}

define_suberror! {
    /// Errors from bounded-queue blocking push operations.
    pub enum PushError {
        WouldOverflow,
        Interrupted,
    }
}

define_suberror! {
    /// Errors from bounded-queue blocking push operations with a timeout.
    pub enum PushTimeoutError {
        WouldOverflow,
        TimedOut,
        Interrupted,
    }
}

define_suberror! {
    /// Errors from [`crate::signal::queue`].
    pub enum QueueSignalError {
        InvalidArgument,
        WouldOverflow,
    }
}

/// Convert a timeout-flavored result into its non-timeout counterpart,
/// panicking if it actually was a timeout. Used at call sites that pass
/// `Duration::INFINITE` and therefore know the `TimedOut` arm is
/// unreachable.
#[inline]
pub fn expect_not_timed_out(e: WaitTimeoutError) -> WaitError {
    match e {
        WaitTimeoutError::Interrupted => WaitError::Interrupted,
        WaitTimeoutError::TimedOut => fatal("got a timeout result from a non-timeout wait"),
    }
}
