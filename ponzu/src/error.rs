//! Errors reported at the framework boundary
//!
//! Anything beyond these is an internal invariant violation and panics; a
//! corrupted wait state machine has no recovery path.

use thiserror::Error;

/// Why a wait call returned without acquiring anything.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The hidden timeout callout fired before any object in the wait set
    /// was satisfied.
    #[error("wait timed out")]
    TimedOut,
    /// The wait was a poll ([`Deadline::Poll`](crate::time::Deadline::Poll))
    /// and no object was ready.
    #[error("no object in the wait set was ready")]
    WouldBlock,
    /// An interruptible wait was cancelled by the thread-termination path.
    #[error("wait interrupted by thread termination")]
    Interrupted,
}

/// A signal-side operation was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchError {
    /// A mutex release from a thread that does not own the mutex.
    #[error("mutex released by a thread that does not own it")]
    NotOwner,
    /// A semaphore post that would push the ready count past its
    /// representable range. The post does not land; no part of it is
    /// applied.
    #[error("semaphore post would overflow the ready count")]
    Overflow,
}
