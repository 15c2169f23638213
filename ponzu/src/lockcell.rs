//! The spinlock guarding framework state
//!
//! [`SpinLock`] is a ticket lock: acquisition order is FIFO, which keeps the
//! lock fair under contention on the hot signal paths. Both the per-object
//! lock and the per-thread lock are this type. Framework locks are only ever
//! held for short straight-line critical sections and never across parking.

use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

use crate::platform::Platform;

/// marker for an unowned lock
const NO_OWNER: usize = usize::MAX;

/// A fair spinlock guarding simultaneous access to a value.
#[derive(Debug)]
pub struct SpinLock<T, P> {
    /// the ticket currently allowed to hold the lock
    serving: AtomicU64,
    /// the next ticket to hand out
    next_ticket: AtomicU64,
    /// cpu currently holding the lock, [`NO_OWNER`] if free
    owner: AtomicUsize,
    /// the data within the lock
    data: UnsafeCell<T>,
    /// phantom access to the platform's cpu and preemption state
    _platform: PhantomData<P>,
}

unsafe impl<T: Send, P: Platform> Send for SpinLock<T, P> {}
unsafe impl<T: Send, P: Platform> Sync for SpinLock<T, P> {}

impl<T, P> SpinLock<T, P> {
    /// creates a new [`SpinLock`]
    pub const fn new(data: T) -> Self {
        Self {
            serving: AtomicU64::new(0),
            next_ticket: AtomicU64::new(0),
            owner: AtomicUsize::new(NO_OWNER),
            data: UnsafeCell::new(data),
            _platform: PhantomData,
        }
    }

    /// Consumes the lock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T, P: Platform> SpinLock<T, P> {
    /// gives out access to the value of this lock. Blocks until access is
    /// granted.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T, P> {
        unsafe {
            // Safety: paired with exit_lock in the guard drop
            P::enter_lock();
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        while self.serving.load(Ordering::SeqCst) != ticket {
            let owner = self.owner.load(Ordering::Acquire);
            if owner != NO_OWNER && owner == P::cpu_id() {
                panic!("Deadlock detected");
            }
            spin_loop();
        }
        self.owner.store(P::cpu_id(), Ordering::Release);

        SpinLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// returns `true` if the lock is currently unlocked.
    ///
    /// The caller can't rely on this fact, since some other core could take
    /// the lock right after this call finishes.
    pub fn is_unlocked(&self) -> bool {
        self.owner.load(Ordering::Acquire) == NO_OWNER
    }
}

impl<T: Default, P> Default for SpinLock<T, P> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

/// A guard structure that allows safe access to the value inside a
/// [`SpinLock`]. When this is dropped, the lock is released.
#[derive(Debug)]
pub struct SpinLockGuard<'l, T, P: Platform> {
    lock: &'l SpinLock<T, P>,
    /// keeps the guard on the cpu that took the ticket
    _not_send: PhantomData<*mut ()>,
}

impl<T, P: Platform> Deref for SpinLockGuard<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: there is only ever 1 guard for a given lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<T, P: Platform> DerefMut for SpinLockGuard<'_, T, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: there is only ever 1 guard for a given lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T, P: Platform> Drop for SpinLockGuard<'_, T, P> {
    fn drop(&mut self) {
        self.lock.owner.store(NO_OWNER, Ordering::Release);
        self.lock.serving.fetch_add(1, Ordering::SeqCst);
        unsafe {
            // Safety: this pairs with the enter_lock in SpinLock::lock
            P::exit_lock();
        }
    }
}
