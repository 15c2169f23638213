//! Per-thread wait state and the commit/wake protocol
//!
//! Every thread that waits through the framework owns a [`WaitState`]: a
//! single atomic status word, a small spinlock serializing the sleep
//! transition against wakers, a parker handle into the scheduler and a pool
//! of retired wait blocks. The status word is manipulated exclusively by
//! compare-and-swap; the three legal transitions
//! (`PreWait -> PostWait`, `PreWait -> Wait`, `Wait -> PostWait`) are what
//! make lost and spurious wakeups impossible.

use alloc::sync::Arc;
use core::{
    fmt,
    sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering},
};

use log::trace;
use static_assertions::const_assert_eq;

use crate::{
    lockcell::SpinLock,
    object::{KindState, SynchObject},
    platform::Platform,
    wait_block::BlockPool,
};

/// no object has satisfied the current wait
const NO_SATISFIER: usize = usize::MAX;

/// The atomic wait status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SynchStatus {
    /// Not inside a wait call.
    Idle = 0,
    /// Preparing a wait: enqueueing wait blocks, not yet asleep.
    PreWait = 1,
    /// Committed to sleep.
    Wait = 2,
    /// Claimed: exactly one object (or the thread itself, on early
    /// satisfaction) owns the outcome of this wait.
    PostWait = 3,
}

const_assert_eq!(core::mem::size_of::<SynchStatus>(), 1);

impl SynchStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::PreWait,
            2 => Self::Wait,
            3 => Self::PostWait,
            _ => unreachable!("corrupt synch status: {raw}"),
        }
    }
}

/// What the scheduler side of a thread is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedState {
    /// On a cpu.
    Running,
    /// Woken and waiting for a cpu.
    Runnable,
    /// Parked in the scheduler.
    Sleeping,
}

/// Identifies a thread for the lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}

/// The wait-side state of one thread.
pub(crate) struct WaitState<P: Platform> {
    id: ThreadId,
    name: &'static str,
    /// the CAS-only status word
    synch_status: AtomicU8,
    /// wait-set index of the object that ended the current wait
    satisfier: AtomicUsize,
    /// the thread lock: serializes the sleep transition against wakers
    sched: SpinLock<SchedState, P>,
    parker: P::Parker,
    pool: BlockPool<P>,
    /// signaled by the termination path to cancel interruptible waits
    kill: Arc<SynchObject<P>>,
}

impl<P: Platform> WaitState<P> {
    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    pub(crate) fn pool(&self) -> &BlockPool<P> {
        &self.pool
    }

    pub(crate) fn kill_object(&self) -> &Arc<SynchObject<P>> {
        &self.kill
    }

    pub(crate) fn status(&self) -> SynchStatus {
        SynchStatus::from_u8(self.synch_status.load(Ordering::SeqCst))
    }

    /// Try to move the status from `from` to `PostWait`, claiming the
    /// outcome of the thread's current wait.
    ///
    /// This is the exactly-once rendezvous: whoever wins this CAS (a
    /// signaler, or the thread itself during preparation) is the only party
    /// that may run an acquisition for the wait.
    pub(crate) fn claim(&self, from: SynchStatus) -> bool {
        self.synch_status
            .compare_exchange(
                from as u8,
                SynchStatus::PostWait as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Enter a new wait: quiescent -> `PreWait`, satisfier cleared.
    pub(crate) fn begin_wait(&self) {
        let previous = self
            .synch_status
            .swap(SynchStatus::PreWait as u8, Ordering::SeqCst);
        let previous = SynchStatus::from_u8(previous);
        assert!(
            matches!(previous, SynchStatus::Idle | SynchStatus::PostWait),
            "{} entered a wait while already waiting ({previous:?})",
            self.id,
        );
        self.satisfier.store(NO_SATISFIER, Ordering::SeqCst);
    }

    /// Record which wait-set entry ended the wait.
    ///
    /// Called by the winner of [`WaitState::claim`] only, so the slot is
    /// written at most once per wait.
    pub(crate) fn set_satisfier(&self, index: usize) {
        self.satisfier.store(index, Ordering::SeqCst);
    }

    pub(crate) fn satisfier(&self) -> Option<usize> {
        match self.satisfier.load(Ordering::SeqCst) {
            NO_SATISFIER => None,
            index => Some(index),
        }
    }

    /// The commit phase: try `PreWait -> Wait` under the thread lock and
    /// sleep until a signaler moves the status to `PostWait`.
    ///
    /// If the CAS fails the thread has already been satisfied and no sleep
    /// happens. The lock is dropped before parking; no framework lock is
    /// ever held across a park.
    pub(crate) fn commit_and_sleep(&self) {
        let mut sched = self.sched.lock();
        if self.synch_status
            .compare_exchange(
                SynchStatus::PreWait as u8,
                SynchStatus::Wait as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            // Already PostWait: a signaler claimed us during preparation.
            return;
        }
        *sched = SchedState::Sleeping;
        drop(sched);

        trace!("{} ({}) committed to sleep", self.id, self.name);
        while self.status() == SynchStatus::Wait {
            P::park(&self.parker);
        }
        *self.sched.lock() = SchedState::Running;
        trace!("{} ({}) woke", self.id, self.name);
    }

    /// Wake a thread this caller has claimed out of `Wait`.
    ///
    /// The short critical section on the thread lock serializes against a
    /// concurrent commit that has not finished its transition yet.
    pub(crate) fn wake(&self) {
        let mut sched = self.sched.lock();
        *sched = SchedState::Runnable;
        P::unpark(&self.parker);
    }
}

/// A thread registered with the synchronization framework.
///
/// Created on the thread it represents (the parker is captured from the
/// calling context). The handle is cheap to clone and may be sent to other
/// threads, e.g. to [`interrupt`](Thread::interrupt) the owner.
pub struct Thread<P: Platform> {
    state: Arc<WaitState<P>>,
}

impl<P: Platform> Thread<P> {
    /// Register the calling thread under `name`.
    pub fn new(name: &'static str) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        let id = ThreadId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        trace!("registering thread {id} ({name})");
        Self {
            state: Arc::new(WaitState {
                id,
                name,
                synch_status: AtomicU8::new(SynchStatus::Idle as u8),
                satisfier: AtomicUsize::new(NO_SATISFIER),
                sched: SpinLock::new(SchedState::Running),
                parker: P::current_parker(),
                pool: BlockPool::new(),
                kill: SynchObject::new_raw(KindState::Event),
            }),
        }
    }

    /// This thread's id, as reported by e.g.
    /// [`Mutex::owner`](crate::object::Mutex::owner).
    pub fn id(&self) -> ThreadId {
        self.state.id
    }

    /// The debug name the thread registered under.
    pub fn name(&self) -> &'static str {
        self.state.name
    }

    /// Cancel the thread's interruptible waits, now and in the future.
    ///
    /// This is the thread-termination path's entry point. It behaves as a
    /// signaler on the thread's kill event, which is an implicit member of
    /// every interruptible wait set. Idempotent; non-interruptible waits are
    /// unaffected.
    pub fn interrupt(&self) {
        trace!("interrupting {} ({})", self.state.id, self.state.name);
        self.state.kill.signal_event();
    }

    /// `true` once [`interrupt`](Thread::interrupt) has been called.
    pub fn is_interrupted(&self) -> bool {
        self.state.kill.ready_count() > 0
    }

    pub(crate) fn state(&self) -> &Arc<WaitState<P>> {
        &self.state
    }
}

impl<P: Platform> Clone for Thread<P> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<P: Platform> fmt::Debug for Thread<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.state.id)
            .field("name", &self.state.name)
            .field("status", &self.state.status())
            .finish()
    }
}
