//! The wait engine
//!
//! [`waitn`] is the single entry point through which threads block:
//!
//! * **Preparation**: one wait block per object is linked into the object
//!   queues, unless some object is already ready, in which case the thread
//!   claims itself and acquires on the spot.
//! * **Commit**: the thread moves `PreWait -> Wait` under its own lock and
//!   parks. A signaler that claimed the thread during preparation makes the
//!   transition fail, and no sleep happens.
//! * **Finish**: every block the thread owns is resolved under its object's
//!   lock. Still-active blocks are unlinked, the acquired block names the
//!   satisfier, inactive blocks were already removed by a signaler.
//!
//! A finite deadline appends a hidden callout to the wait set; cancellation
//! of the timeout is free because a wait satisfied elsewhere simply finds
//! the callout's block still active and unlinks it. An interruptible wait
//! likewise appends the thread's kill event.

use alloc::{sync::Arc, vec::Vec};

use log::trace;

use crate::{
    error::WaitError,
    object::{Callout, SynchObject, Waitable},
    platform::Platform,
    thread::{SynchStatus, Thread},
    time::Deadline,
    wait_block::{WaitBlock, WaitBlockStatus, MAX_WAIT_OBJECTS},
};

/// Wait on a single object. See [`waitn`].
///
/// On success the returned index is always 0.
pub fn wait1<P: Platform>(
    thread: &Thread<P>,
    object: &dyn Waitable<P>,
    reason: &str,
    interruptible: bool,
    deadline: Deadline,
) -> Result<usize, WaitError> {
    waitn(thread, &[object], reason, interruptible, deadline)
}

/// Wait until one of `objects` satisfies `thread`.
///
/// Returns the index of the satisfying object. Exactly one object satisfies
/// a wait; the acquisition side effect (consuming a semaphore unit,
/// installing a mutex owner) has already happened when this returns.
///
/// `reason` is an opaque debug string. `deadline` selects between polling
/// ([`Deadline::Poll`]), a timed wait and an unbounded one; `interruptible`
/// opts into cancellation by [`Thread::interrupt`].
pub fn waitn<P: Platform>(
    thread: &Thread<P>,
    objects: &[&dyn Waitable<P>],
    reason: &str,
    interruptible: bool,
    deadline: Deadline,
) -> Result<usize, WaitError> {
    let state = thread.state().clone();
    let user_count = objects.len();

    // The wait set: user objects first, then the hidden entries, so user
    // readiness is always preferred over a timeout or cancellation that
    // becomes ready at the same moment.
    let mut set: Vec<Arc<SynchObject<P>>> = objects
        .iter()
        .map(|object| object.synch_object().clone())
        .collect();

    let hidden_timeout = deadline.expiry().map(|_| {
        let callout = Callout::<P>::new();
        set.push(callout.synch_object().clone());
        callout
    });
    let timeout_index = hidden_timeout.as_ref().map(|_| user_count);

    let kill_index = interruptible.then(|| {
        set.push(state.kill_object().clone());
        set.len() - 1
    });

    assert!(
        set.len() <= MAX_WAIT_OBJECTS,
        "wait set of {} exceeds the {MAX_WAIT_OBJECTS} object limit",
        set.len(),
    );

    trace!(
        "{} waits on {} objects (reason: {reason}, deadline: {deadline:?})",
        state.id(),
        set.len(),
    );

    state.begin_wait();
    if let (Some(callout), Some(expiry)) = (&hidden_timeout, deadline.expiry()) {
        callout.set(expiry);
    }

    // Preparation.
    let mut blocks: Vec<Arc<WaitBlock<P>>> = Vec::with_capacity(set.len());
    for (index, object) in set.iter().enumerate() {
        let mut guard = object.lock_state();
        if guard.is_ready() {
            if state.claim(SynchStatus::PreWait) {
                guard.try_acquire(&state);
                state.set_satisfier(index);
            }
            // Whether we claimed ourselves or a signaler beat us to it, the
            // wait is decided.
            break;
        }
        let block = state.pool().checkout(state.clone(), object.clone(), index);
        guard.enqueue(block.clone());
        blocks.push(block);
    }

    // Commit. A poll never sleeps.
    if deadline != Deadline::Poll {
        state.commit_and_sleep();
    }

    // Finish.
    let mut acquired = None;
    for block in &blocks {
        let object = block.object().clone();
        let mut guard = object.lock_state();
        match block.status() {
            WaitBlockStatus::Active => guard.unlink(block),
            WaitBlockStatus::Acquired => {
                debug_assert!(acquired.is_none(), "two objects satisfied one wait");
                acquired = Some(block.index());
            }
            WaitBlockStatus::Inactive => {}
        }
    }
    // A poll that nothing claimed is closed out here. Every block is
    // unlinked by now, so a signaler that won this race instead has marked
    // one of the blocks above as acquired.
    let unclaimed = state.claim(SynchStatus::PreWait);

    for block in blocks {
        state.pool().checkin(block);
    }
    if let Some(callout) = &hidden_timeout {
        callout.reset();
    }

    let satisfier = state.satisfier();
    if let Some(index) = acquired {
        debug_assert_eq!(satisfier, Some(index), "satisfier does not match the acquired block");
    }
    match satisfier {
        None => {
            debug_assert!(
                unclaimed && deadline == Deadline::Poll,
                "blocking wait finished without a satisfier"
            );
            Err(WaitError::WouldBlock)
        }
        index if index == timeout_index => Err(WaitError::TimedOut),
        index if index == kill_index => Err(WaitError::Interrupted),
        Some(index) => {
            debug_assert!(index < user_count);
            Ok(index)
        }
    }
}

#[cfg(test)]
mod test {
    use super::{wait1, waitn};
    use crate::{
        error::{SynchError, WaitError},
        object::{Event, Mutex, Semaphore, Waitable},
        platform::Platform,
        testing::NoParkPlatform,
        thread::Thread,
        time::{Deadline, Duration},
    };

    fn thread(name: &'static str) -> Thread<NoParkPlatform> {
        Thread::new(name)
    }

    #[test]
    fn poll_prefers_the_first_ready_object() {
        let us = thread("poller");
        let owner = thread("owner");

        let mutex = Mutex::new();
        mutex.acquire(&owner, Deadline::Poll).unwrap();
        let event = Event::new();
        event.signal();

        let index = waitn(
            &us,
            &[&mutex, &event],
            "poll-both",
            false,
            Deadline::Poll,
        )
        .unwrap();
        assert_eq!(index, 1);
        // The event is sticky and the mutex untouched.
        assert!(event.is_set());
        assert_eq!(mutex.owner(), Some(owner.id()));
        assert_eq!(mutex.synch_object().waiters(), 0);
    }

    #[test]
    fn poll_on_nothing_ready_would_block() {
        let us = thread("poller");
        let event: Event<NoParkPlatform> = Event::new();
        let err = wait1(&us, &event, "poll-unset", false, Deadline::Poll).unwrap_err();
        assert_eq!(err, WaitError::WouldBlock);
        // The block enqueued during preparation was unlinked again.
        assert_eq!(event.synch_object().waiters(), 0);
    }

    #[test]
    fn semaphore_units_are_consumed_one_by_one() {
        let us = thread("sem");
        let semaphore: Semaphore<NoParkPlatform> = Semaphore::new(3);
        for expected in [2, 1, 0] {
            semaphore.wait(&us, Deadline::Poll).unwrap();
            assert_eq!(semaphore.count(), expected);
        }
        assert_eq!(
            semaphore.wait(&us, Deadline::Poll).unwrap_err(),
            WaitError::WouldBlock
        );
        semaphore.post(1).unwrap();
        semaphore.wait(&us, Deadline::Poll).unwrap();
        assert_eq!(semaphore.count(), 0);
    }

    #[test]
    fn semaphore_post_overflow_is_refused() {
        let semaphore: Semaphore<NoParkPlatform> = Semaphore::new(u32::MAX - 1);
        assert_eq!(semaphore.post(2).unwrap_err(), SynchError::Overflow);
        // The failed post did not land partially.
        assert_eq!(semaphore.count(), u32::MAX - 1);
        semaphore.post(1).unwrap();
    }

    #[test]
    fn mutex_ownership_moves_through_the_engine() {
        let a = thread("a");
        let b = thread("b");
        let mutex: Mutex<NoParkPlatform> = Mutex::new();

        mutex.acquire(&a, Deadline::Poll).unwrap();
        assert_eq!(mutex.owner(), Some(a.id()));
        assert_eq!(
            mutex.acquire(&b, Deadline::Poll).unwrap_err(),
            WaitError::WouldBlock
        );

        assert_eq!(mutex.release(&b).unwrap_err(), SynchError::NotOwner);
        mutex.release(&a).unwrap();
        assert_eq!(mutex.owner(), None);

        mutex.acquire(&b, Deadline::Poll).unwrap();
        assert_eq!(mutex.owner(), Some(b.id()));
        mutex.release(&b).unwrap();
    }

    #[test]
    fn event_reset_blocks_future_waits_only() {
        let us = thread("resetter");
        let event: Event<NoParkPlatform> = Event::new();
        event.signal();
        event.signal(); // idempotent
        assert_eq!(event.synch_object().ready_count(), 1);

        event.wait(&us, Deadline::Poll).unwrap();
        event.reset();
        assert_eq!(
            event.wait(&us, Deadline::Poll).unwrap_err(),
            WaitError::WouldBlock
        );
    }

    #[test]
    fn timed_wait_expires_through_the_hidden_callout() {
        let us = thread("sleeper");
        let event: Event<NoParkPlatform> = Event::new();
        let deadline = NoParkPlatform::now() + Duration::from_millis(10);
        let err = wait1(&us, &event, "timeout", false, Deadline::At(deadline)).unwrap_err();
        assert_eq!(err, WaitError::TimedOut);
        assert!(NoParkPlatform::now() >= deadline);
        // No block remains in the event's queue.
        assert_eq!(event.synch_object().waiters(), 0);
    }

    #[test]
    fn ready_object_beats_an_already_expired_deadline() {
        let us = thread("sleeper");
        let event: Event<NoParkPlatform> = Event::new();
        event.signal();
        // The deadline is in the past, but user objects are scanned first.
        let deadline = NoParkPlatform::now() - Duration::from_millis(1);
        let index = wait1(&us, &event, "expired", false, Deadline::At(deadline)).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn interrupted_thread_does_not_enter_interruptible_waits() {
        let us = thread("doomed");
        let event: Event<NoParkPlatform> = Event::new();
        us.interrupt();
        let err = wait1(&us, &event, "cancelled", true, Deadline::Forever).unwrap_err();
        assert_eq!(err, WaitError::Interrupted);
        // Non-interruptible waits ignore the cancellation.
        assert_eq!(
            wait1(&us, &event, "stubborn", false, Deadline::Poll).unwrap_err(),
            WaitError::WouldBlock
        );
    }

    #[test]
    fn ready_user_object_wins_over_pending_interrupt() {
        let us = thread("lucky");
        let event: Event<NoParkPlatform> = Event::new();
        event.signal();
        us.interrupt();
        let index = wait1(&us, &event, "both-ready", true, Deadline::Forever).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn duplicate_objects_in_one_set_satisfy_once() {
        let us = thread("dup");
        let semaphore: Semaphore<NoParkPlatform> = Semaphore::new(1);
        let index = waitn(
            &us,
            &[&semaphore, &semaphore],
            "duplicates",
            false,
            Deadline::Poll,
        )
        .unwrap();
        assert_eq!(index, 0);
        assert_eq!(semaphore.count(), 0);
        assert_eq!(semaphore.synch_object().waiters(), 0);
    }

    #[test]
    fn empty_poll_would_block() {
        let us = thread("empty");
        let err = waitn(&us, &[], "nothing", false, Deadline::Poll).unwrap_err();
        assert_eq!(err, WaitError::WouldBlock);
    }
}
