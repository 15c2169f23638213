//! The seam between the framework and the kernel it runs inside
//!
//! The scheduler, the time source and the timer hardware are not part of this
//! crate. They are reached through the [`Platform`] trait, which is threaded
//! through every framework type as a `'static` type parameter. A kernel
//! implements [`Platform`] once; tests implement it on top of host threads.

use crate::{object::Callout, time::Timestamp};

/// Trait that allows access to OS-level constructs for parking and waking
/// threads, reading the clock and arming timers.
pub trait Platform: 'static + Send + Sync + Sized {
    /// Handle through which a sleeping thread can be woken.
    ///
    /// For a kernel this is typically a reference to the thread control
    /// block; for host tests it is a host thread handle.
    type Parker: Send + Sync + 'static;

    /// Returns the parker for the calling thread.
    ///
    /// Called once when a thread registers with the framework, on the thread
    /// being registered.
    fn current_parker() -> Self::Parker;

    /// Block the calling thread until [`Platform::unpark`] is called on its
    /// parker.
    ///
    /// An unpark issued before the park must not be lost (permit semantics).
    /// Spurious returns are allowed; the framework re-checks its own state
    /// and parks again.
    fn park(parker: &Self::Parker);

    /// Wake the thread behind `parker`, or bank the wakeup if it is not
    /// parked yet.
    fn unpark(parker: &Self::Parker);

    /// The current monotonic time.
    fn now() -> Timestamp;

    /// Arrange for `callout.fire()` to be invoked once the clock reaches
    /// `deadline`.
    ///
    /// There is no cancel entry point. A callout that was reset before its
    /// deadline ignores the late fire on its own.
    fn arm(deadline: Timestamp, callout: Callout<Self>);

    /// Identifies the executing cpu, for lock diagnostics.
    fn cpu_id() -> usize;

    /// A framework spinlock was taken.
    ///
    /// Kernels use this to disable preemption or interrupts while the lock
    /// is held.
    ///
    /// # Safety:
    ///
    /// caller must call [`Platform::exit_lock`] exactly once per invocation
    unsafe fn enter_lock();

    /// A framework spinlock was released.
    ///
    /// # Safety:
    ///
    /// caller must ensure this pairs with a previous
    /// [`Platform::enter_lock`]
    unsafe fn exit_lock();
}
