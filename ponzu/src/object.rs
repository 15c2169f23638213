//! Synchronization objects and the signal-side drain
//!
//! All four object kinds share the same skeleton: a ready count, a FIFO
//! queue of wait blocks and a spinlock guarding both. Only the side effect
//! of converting readiness into an acquisition differs per kind, so the
//! variation is a single `match` inside [`ObjectState::try_acquire`] rather
//! than a type hierarchy.
//!
//! Signalers never touch a waiter outside the drain loop: raise the ready
//! count under the object lock, then serve queued waiters front to back
//! until the readiness or the queue is exhausted. Claimed sleepers are
//! unparked only after the object lock is dropped.

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};
use core::fmt;

use log::trace;

use crate::{
    error::{SynchError, WaitError},
    lockcell::{SpinLock, SpinLockGuard},
    platform::Platform,
    thread::{SynchStatus, Thread, ThreadId, WaitState},
    time::{Deadline, Timestamp},
    wait_block::{WaitBlock, WaitBlockStatus},
};

/// The kind of a synchronization object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Sticky signal: satisfied waiters do not consume the readiness.
    Event,
    /// Counted resource: every acquisition consumes one unit.
    Semaphore,
    /// Exclusive ownership: an acquisition installs the new owner.
    Mutex,
    /// A timer latch: behaves like an event once the deadline fires.
    Callout,
}

/// Kind tag plus the state only that kind carries.
pub(crate) enum KindState {
    Event,
    Semaphore,
    Mutex { owner: Option<ThreadId> },
    Callout { armed: bool, deadline: Timestamp },
}

/// Everything the object lock guards.
pub(crate) struct ObjectState<P: Platform> {
    /// 0 = not ready. Events and mutexes use 0/1, semaphores the full range,
    /// callouts latch at 1 after firing.
    pub(crate) ready: u32,
    /// head = next waiter to satisfy
    waitq: VecDeque<Arc<WaitBlock<P>>>,
    pub(crate) kind: KindState,
}

impl<P: Platform> ObjectState<P> {
    pub(crate) fn is_ready(&self) -> bool {
        self.ready > 0
    }

    /// Convert observed readiness into an acquisition for `thread`.
    ///
    /// Called under the object lock, exactly once per satisfied wait, after
    /// `ready > 0` has been observed.
    pub(crate) fn try_acquire(&mut self, thread: &Arc<WaitState<P>>) {
        debug_assert!(self.ready > 0, "acquisition without readiness");
        match &mut self.kind {
            // Sticky kinds: one signal satisfies every queued waiter.
            KindState::Event | KindState::Callout { .. } => {}
            KindState::Semaphore => self.ready -= 1,
            KindState::Mutex { owner } => {
                debug_assert!(owner.is_none(), "mutex ready while owned");
                self.ready = 0;
                *owner = Some(thread.id());
            }
        }
    }

    /// Link a prepared wait block at the tail of the queue.
    pub(crate) fn enqueue(&mut self, block: Arc<WaitBlock<P>>) {
        debug_assert_eq!(block.status(), WaitBlockStatus::Active);
        self.waitq.push_back(block);
    }

    /// Remove a still-active block, on behalf of its waiter.
    pub(crate) fn unlink(&mut self, block: &Arc<WaitBlock<P>>) {
        let pos = self
            .waitq
            .iter()
            .position(|queued| Arc::ptr_eq(queued, block))
            .expect("active wait block missing from its object's queue");
        self.waitq.remove(pos);
    }

    /// Serve queued waiters until the ready count or the queue runs out.
    ///
    /// Threads claimed out of their sleep are collected into `wake`; the
    /// caller unparks them once the object lock is dropped.
    pub(crate) fn drain(&mut self, wake: &mut Vec<Arc<WaitState<P>>>) {
        while self.ready > 0 {
            let Some(front) = self.waitq.front() else {
                break;
            };
            let block = front.clone();
            let thread = block.thread().clone();
            if thread.claim(SynchStatus::PreWait) {
                // Claimed a thread still preparing its wait; it will find
                // the acquired block in its finish phase without sleeping.
                block.set_status(WaitBlockStatus::Acquired);
                self.try_acquire(&thread);
                self.waitq.pop_front();
                thread.set_satisfier(block.index());
            } else if thread.claim(SynchStatus::Wait) {
                block.set_status(WaitBlockStatus::Acquired);
                self.try_acquire(&thread);
                self.waitq.pop_front();
                thread.set_satisfier(block.index());
                wake.push(thread);
            } else {
                // Another object already won this thread's wait.
                block.set_status(WaitBlockStatus::Inactive);
                self.waitq.pop_front();
            }
        }
        debug_assert!(
            self.ready == 0 || self.waitq.is_empty(),
            "drain left waiters behind a ready object"
        );
    }

    fn kind(&self) -> Kind {
        match self.kind {
            KindState::Event => Kind::Event,
            KindState::Semaphore => Kind::Semaphore,
            KindState::Mutex { .. } => Kind::Mutex,
            KindState::Callout { .. } => Kind::Callout,
        }
    }
}

/// Drain the queue and, with the object lock dropped, unpark every thread
/// the drain claimed out of its sleep.
///
/// Deferring the unparks keeps scheduler calls outside the object lock and
/// rules out lock-order inversions with the thread lock.
fn run_drain<P: Platform>(mut guard: SpinLockGuard<'_, ObjectState<P>, P>) {
    let mut wake: Vec<Arc<WaitState<P>>> = Vec::new();
    guard.drain(&mut wake);
    drop(guard);
    for thread in wake {
        thread.wake();
    }
}

/// A waitable kernel object: ready count, wait queue, lock and kind.
///
/// Owned by whatever subsystem declares it (through the [`Event`],
/// [`Semaphore`], [`Mutex`] and [`Callout`] wrappers); the wait engine only
/// ever borrows it.
pub struct SynchObject<P: Platform> {
    state: SpinLock<ObjectState<P>, P>,
}

impl<P: Platform> SynchObject<P> {
    pub(crate) fn new_raw(kind: KindState) -> Arc<Self> {
        let ready = match &kind {
            KindState::Semaphore => 0,
            KindState::Mutex { .. } => 1,
            _ => 0,
        };
        Arc::new(Self {
            state: SpinLock::new(ObjectState {
                ready,
                waitq: VecDeque::new(),
                kind,
            }),
        })
    }

    pub(crate) fn lock_state(&self) -> SpinLockGuard<'_, ObjectState<P>, P> {
        self.state.lock()
    }

    /// Which kind of object this is.
    pub fn kind(&self) -> Kind {
        self.state.lock().kind()
    }

    /// Snapshot of the ready count.
    pub fn ready_count(&self) -> u32 {
        self.state.lock().ready
    }

    /// Snapshot of the number of queued waiters.
    pub fn waiters(&self) -> usize {
        self.state.lock().waitq.len()
    }

    /// Latch the object ready and drain, event style. Also the signal path
    /// of the per-thread kill event.
    pub(crate) fn signal_event(&self) {
        let mut guard = self.state.lock();
        debug_assert!(matches!(guard.kind, KindState::Event));
        guard.ready = 1;
        run_drain(guard);
    }
}

impl<P: Platform> fmt::Debug for SynchObject<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.state.lock();
        f.debug_struct("SynchObject")
            .field("kind", &guard.kind())
            .field("ready", &guard.ready)
            .field("waiters", &guard.waitq.len())
            .finish()
    }
}

/// Anything the wait engine can wait on.
pub trait Waitable<P: Platform> {
    /// The underlying synchronization object.
    fn synch_object(&self) -> &Arc<SynchObject<P>>;
}

/// A latched broadcast signal.
///
/// Signaling satisfies every current waiter and leaves the event set, so
/// later waits complete immediately until [`Event::reset`].
pub struct Event<P: Platform> {
    object: Arc<SynchObject<P>>,
}

impl<P: Platform> Event<P> {
    /// Create a new event in the reset state.
    pub fn new() -> Self {
        Self {
            object: SynchObject::new_raw(KindState::Event),
        }
    }

    /// Set the event and satisfy every queued waiter.
    ///
    /// Signaling an already-set event changes nothing.
    pub fn signal(&self) {
        trace!("event signal");
        self.object.signal_event();
    }

    /// Clear the event. Waiters already satisfied are unaffected; future
    /// waits block until the next signal.
    pub fn reset(&self) {
        self.object.lock_state().ready = 0;
    }

    /// `true` while the event is set.
    pub fn is_set(&self) -> bool {
        self.object.ready_count() > 0
    }

    /// Block `thread` until the event is set.
    pub fn wait(&self, thread: &Thread<P>, deadline: Deadline) -> Result<(), WaitError> {
        crate::engine::wait1(thread, self, "event-wait", false, deadline).map(|_| ())
    }
}

impl<P: Platform> Default for Event<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Waitable<P> for Event<P> {
    fn synch_object(&self) -> &Arc<SynchObject<P>> {
        &self.object
    }
}

impl<P: Platform> Clone for Event<P> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
        }
    }
}

/// A counting semaphore.
pub struct Semaphore<P: Platform> {
    object: Arc<SynchObject<P>>,
}

impl<P: Platform> Semaphore<P> {
    /// Create a semaphore holding `count` units.
    pub fn new(count: u32) -> Self {
        let object = SynchObject::new_raw(KindState::Semaphore);
        object.lock_state().ready = count;
        Self { object }
    }

    /// Return `n` units, satisfying up to `n` queued waiters.
    ///
    /// Fails with [`SynchError::Overflow`] if the count cannot absorb the
    /// whole post; nothing is applied in that case.
    pub fn post(&self, n: u32) -> Result<(), SynchError> {
        let mut guard = self.object.lock_state();
        let Some(next) = guard.ready.checked_add(n) else {
            return Err(SynchError::Overflow);
        };
        guard.ready = next;
        run_drain(guard);
        Ok(())
    }

    /// Snapshot of the available units.
    pub fn count(&self) -> u32 {
        self.object.ready_count()
    }

    /// Block `thread` until a unit is available, then consume it.
    pub fn wait(&self, thread: &Thread<P>, deadline: Deadline) -> Result<(), WaitError> {
        crate::engine::wait1(thread, self, "semaphore-wait", false, deadline).map(|_| ())
    }
}

impl<P: Platform> Waitable<P> for Semaphore<P> {
    fn synch_object(&self) -> &Arc<SynchObject<P>> {
        &self.object
    }
}

impl<P: Platform> Clone for Semaphore<P> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
        }
    }
}

/// A sleeping mutual-exclusion lock.
///
/// Acquisition goes through the wait engine; waiting on a mutex the calling
/// thread already owns is not detected and blocks forever.
pub struct Mutex<P: Platform> {
    object: Arc<SynchObject<P>>,
}

impl<P: Platform> Mutex<P> {
    /// Create an unowned mutex.
    pub fn new() -> Self {
        Self {
            object: SynchObject::new_raw(KindState::Mutex { owner: None }),
        }
    }

    /// Block `thread` until it owns the mutex.
    pub fn acquire(&self, thread: &Thread<P>, deadline: Deadline) -> Result<(), WaitError> {
        crate::engine::wait1(thread, self, "mutex-acquire", false, deadline).map(|_| ())
    }

    /// Hand the mutex to the longest-waiting thread, or leave it free.
    ///
    /// Fails with [`SynchError::NotOwner`] unless `thread` is the current
    /// owner.
    pub fn release(&self, thread: &Thread<P>) -> Result<(), SynchError> {
        let mut guard = self.object.lock_state();
        let state = &mut *guard;
        match &mut state.kind {
            KindState::Mutex { owner } => {
                if *owner != Some(thread.id()) {
                    return Err(SynchError::NotOwner);
                }
                *owner = None;
                state.ready = 1;
            }
            _ => unreachable!("mutex wrapper around a non-mutex object"),
        }
        trace!("mutex released by {}", thread.id());
        run_drain(guard);
        Ok(())
    }

    /// The current owner, if any.
    pub fn owner(&self) -> Option<ThreadId> {
        match self.object.lock_state().kind {
            KindState::Mutex { owner } => owner,
            _ => unreachable!("mutex wrapper around a non-mutex object"),
        }
    }
}

impl<P: Platform> Default for Mutex<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Waitable<P> for Mutex<P> {
    fn synch_object(&self) -> &Arc<SynchObject<P>> {
        &self.object
    }
}

impl<P: Platform> Clone for Mutex<P> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
        }
    }
}

/// A timer modeled as a synchronization object.
///
/// Arming hands the deadline to the platform's timer subsystem, which calls
/// [`Callout::fire`] back once the clock reaches it. A fired callout stays
/// ready, like a set event, until [`Callout::reset`].
pub struct Callout<P: Platform> {
    object: Arc<SynchObject<P>>,
}

impl<P: Platform> Callout<P> {
    /// Create a disarmed callout.
    pub fn new() -> Self {
        Self {
            object: SynchObject::new_raw(KindState::Callout {
                armed: false,
                deadline: Timestamp::new(0),
            }),
        }
    }

    /// Arm the callout to fire once the clock reaches `deadline`.
    ///
    /// Re-arming replaces the deadline; the stale timer is ignored when it
    /// fires.
    pub fn set(&self, deadline: Timestamp) {
        {
            let mut guard = self.object.lock_state();
            let state = &mut *guard;
            match &mut state.kind {
                KindState::Callout { armed, deadline: slot } => {
                    *armed = true;
                    *slot = deadline;
                    state.ready = 0;
                }
                _ => unreachable!("callout wrapper around a non-callout object"),
            }
        }
        trace!("callout armed for {:?}", deadline);
        P::arm(deadline, self.clone());
    }

    /// The timer subsystem's entry point at deadline expiry.
    ///
    /// Behaves as a signaler: latches the callout ready and drains the
    /// queue. A fire on a disarmed callout, or from a timer whose deadline
    /// was since replaced, is a no-op.
    pub fn fire(&self) {
        let mut guard = self.object.lock_state();
        let state = &mut *guard;
        match &mut state.kind {
            KindState::Callout { armed, deadline } => {
                if !*armed || P::now() < *deadline {
                    return;
                }
                *armed = false;
                state.ready = 1;
            }
            _ => unreachable!("callout wrapper around a non-callout object"),
        }
        trace!("callout fired");
        run_drain(guard);
    }

    /// Clear the latch and disarm.
    pub fn reset(&self) {
        let mut guard = self.object.lock_state();
        let state = &mut *guard;
        match &mut state.kind {
            KindState::Callout { armed, .. } => {
                *armed = false;
                state.ready = 0;
            }
            _ => unreachable!("callout wrapper around a non-callout object"),
        }
    }

    /// `true` once the deadline has fired and the latch is still set.
    pub fn has_fired(&self) -> bool {
        self.object.ready_count() > 0
    }
}

impl<P: Platform> Default for Callout<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Waitable<P> for Callout<P> {
    fn synch_object(&self) -> &Arc<SynchObject<P>> {
        &self.object
    }
}

impl<P: Platform> Clone for Callout<P> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Event, Semaphore, Waitable};
    use crate::{
        testing::NoParkPlatform,
        thread::{SynchStatus, Thread},
        wait_block::WaitBlockStatus,
    };

    #[test]
    fn drain_claims_a_preparing_thread_and_consumes_per_kind() {
        let thread: Thread<NoParkPlatform> = Thread::new("preparing");
        let state = thread.state();
        let semaphore: Semaphore<NoParkPlatform> = Semaphore::new(0);

        state.begin_wait();
        let block = state
            .pool()
            .checkout(state.clone(), semaphore.synch_object().clone(), 0);
        semaphore.synch_object().lock_state().enqueue(block.clone());

        semaphore.post(2).unwrap();

        assert_eq!(block.status(), WaitBlockStatus::Acquired);
        assert_eq!(state.status(), SynchStatus::PostWait);
        assert_eq!(state.satisfier(), Some(0));
        // One of the two posted units went to the claimed waiter.
        assert_eq!(semaphore.count(), 1);
        assert_eq!(semaphore.synch_object().waiters(), 0);
    }

    #[test]
    fn drain_reaps_blocks_of_already_satisfied_threads() {
        let thread: Thread<NoParkPlatform> = Thread::new("reaped");
        let state = thread.state();
        let event: Event<NoParkPlatform> = Event::new();

        state.begin_wait();
        let block = state
            .pool()
            .checkout(state.clone(), event.synch_object().clone(), 0);
        event.synch_object().lock_state().enqueue(block.clone());

        // Another object wins the wait before the event is signaled.
        assert!(state.claim(SynchStatus::PreWait));
        event.signal();

        assert_eq!(block.status(), WaitBlockStatus::Inactive);
        assert_eq!(event.synch_object().waiters(), 0);
        assert!(event.is_set());
    }
}
