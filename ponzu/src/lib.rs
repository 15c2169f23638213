//! A synchronization-object framework for preemptive multi-threaded kernels
//!
//! This crate is the one mechanism by which kernel threads wait for
//! conditions: release of a [`Mutex`], posting of an [`Event`], availability
//! of a [`Semaphore`] unit, or expiry of a [`Callout`] timer. A thread may
//! wait on several objects at once ([`waitn`]); exactly one of them
//! satisfies the wait and its index is reported back.
//!
//! ## The moving parts
//!
//! * [`wait_block`]: the per-(thread, object) record linking a waiter into
//!   an object's FIFO queue.
//! * [`object`]: the four object kinds behind one skeleton of ready count,
//!   wait queue and spinlock, and the signal-side drain.
//! * [`thread`]: the per-thread atomic wait status whose CAS-only
//!   transitions rule out lost and spurious wakeups, plus the sleep commit
//!   protocol.
//! * [`engine`]: [`wait1`]/[`waitn`], the three-phase wait protocol tying
//!   the above together.
//!
//! ## What this crate is not
//!
//! There is no scheduler and no timer hardware in here. Parking, waking,
//! the clock and timer arming are reached through the [`Platform`] trait,
//! which the embedding kernel implements once and threads through the
//! framework types as a type parameter. All framework locks are spinlocks
//! and are never held across parking.

#![no_std]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod engine;
pub mod error;
pub mod lockcell;
pub mod object;
pub mod platform;
pub mod thread;
pub mod time;
pub mod wait_block;

#[cfg(test)]
mod testing;

pub use engine::{wait1, waitn};
pub use error::{SynchError, WaitError};
pub use object::{Callout, Event, Kind, Mutex, Semaphore, SynchObject, Waitable};
pub use platform::Platform;
pub use thread::{Thread, ThreadId};
pub use time::{Deadline, Duration, Timestamp};
pub use wait_block::{MAX_WAIT_OBJECTS, WaitBlockStatus};
