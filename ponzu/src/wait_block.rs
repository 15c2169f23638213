//! Wait blocks: the record tying a waiting thread to one object
//!
//! A wait block lives for the duration of one wait call. It sits in at most
//! one object's wait queue and its status tag is the rendezvous point between
//! the waiter and any signaler: the tag is only ever written under the lock
//! of the object the block belongs to, and after wake-up it is the one
//! mechanism by which the waiter learns which object satisfied it and which
//! of its blocks still need unlinking.

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU8, Ordering};

use static_assertions::const_assert;

use crate::{lockcell::SpinLock, object::SynchObject, platform::Platform, thread::WaitState};

/// Retired wait blocks a thread keeps around for reuse.
///
/// Waits on up to this many objects allocate nothing once the pool is warm;
/// larger wait sets spill to fresh heap blocks that are dropped at finish.
pub const INLINE_WAIT_BLOCKS: usize = 4;

/// Hard cap on the size of one wait set, hidden entries included.
pub const MAX_WAIT_OBJECTS: usize = 64;

const_assert!(INLINE_WAIT_BLOCKS <= MAX_WAIT_OBJECTS);

/// Where a wait block stands between its waiter and the signalers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WaitBlockStatus {
    /// Linked in an object's wait queue, not yet resolved.
    Active = 0,
    /// A signaler dequeued the block and ran the acquisition on the
    /// waiter's behalf; the block's object is the satisfier.
    Acquired = 1,
    /// Dequeued without acquisition: another object won the wait first.
    Inactive = 2,
}

impl WaitBlockStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Active,
            1 => Self::Acquired,
            2 => Self::Inactive,
            _ => unreachable!("corrupt wait block status: {raw}"),
        }
    }
}

/// A per-(thread, object) wait record.
///
/// Both back-references are non-owning in design terms; the reference counts
/// only bound them to the enclosing wait call. While pooled between waits
/// both are cleared.
pub struct WaitBlock<P: Platform> {
    thread: Option<Arc<WaitState<P>>>,
    object: Option<Arc<SynchObject<P>>>,
    /// position of this block's object in the wait set
    index: usize,
    status: AtomicU8,
}

impl<P: Platform> WaitBlock<P> {
    fn new(thread: Arc<WaitState<P>>, object: Arc<SynchObject<P>>, index: usize) -> Self {
        Self {
            thread: Some(thread),
            object: Some(object),
            index,
            status: AtomicU8::new(WaitBlockStatus::Active as u8),
        }
    }

    pub(crate) fn thread(&self) -> &Arc<WaitState<P>> {
        self.thread.as_ref().expect("wait block in use without a thread")
    }

    pub(crate) fn object(&self) -> &Arc<SynchObject<P>> {
        self.object.as_ref().expect("wait block in use without an object")
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Current status. Only meaningful while the object's lock is held.
    pub(crate) fn status(&self) -> WaitBlockStatus {
        WaitBlockStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Must be called with the object's lock held.
    pub(crate) fn set_status(&self, status: WaitBlockStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// The per-thread free list of retired wait blocks.
pub(crate) struct BlockPool<P: Platform> {
    free: SpinLock<Vec<Arc<WaitBlock<P>>>, P>,
}

impl<P: Platform> BlockPool<P> {
    pub(crate) const fn new() -> Self {
        Self {
            free: SpinLock::new(Vec::new()),
        }
    }

    /// Hand out a block wired up for one wait-set entry, reusing a retired
    /// block when one is free.
    pub(crate) fn checkout(
        &self,
        thread: Arc<WaitState<P>>,
        object: Arc<SynchObject<P>>,
        index: usize,
    ) -> Arc<WaitBlock<P>> {
        let mut free = self.free.lock();
        while let Some(mut block) = free.pop() {
            // A retired block can only be reused once every queue reference
            // from its previous wait is gone.
            if let Some(slot) = Arc::get_mut(&mut block) {
                slot.thread = Some(thread);
                slot.object = Some(object);
                slot.index = index;
                slot.set_status(WaitBlockStatus::Active);
                return block;
            }
        }
        drop(free);
        Arc::new(WaitBlock::new(thread, object, index))
    }

    /// Retire a block at the end of a wait.
    ///
    /// Clearing the back-references keeps the pool from pinning its own
    /// thread alive through a reference cycle.
    pub(crate) fn checkin(&self, mut block: Arc<WaitBlock<P>>) {
        if let Some(slot) = Arc::get_mut(&mut block) {
            slot.thread = None;
            slot.object = None;
            let mut free = self.free.lock();
            if free.len() < INLINE_WAIT_BLOCKS {
                free.push(block);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn free_blocks(&self) -> usize {
        self.free.lock().len()
    }
}
