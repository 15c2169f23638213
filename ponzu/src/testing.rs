//! A deterministic [`Platform`] for in-crate tests
//!
//! Unit tests run single-threaded, so a real park would hang forever.
//! [`NoParkPlatform`] instead treats every park as a timer interrupt: due
//! callouts are delivered, and when none are due the clock warps forward to
//! the earliest armed deadline. Parks never block, so a wait that would be
//! lost spins visibly instead of hanging silently.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::{
    lockcell::SpinLock,
    object::Callout,
    platform::Platform,
    time::Timestamp,
};

/// Nanoseconds on the test clock. Starts well away from zero so tests can
/// form deadlines in the past.
static NOW: AtomicU64 = AtomicU64::new(1_000_000_000);

/// Callouts armed and not yet fired, shared by every test in the process.
static ARMED: SpinLock<Vec<(Timestamp, Callout<NoParkPlatform>)>, NoParkPlatform> =
    SpinLock::new(Vec::new());

/// The test platform. Single cpu per test thread, no real sleeping.
pub(crate) struct NoParkPlatform;

impl NoParkPlatform {
    /// Move the clock forward to at least `to`. The test clock never runs
    /// backwards, even with tests racing each other.
    fn warp_to(to: Timestamp) {
        NOW.fetch_max(to.as_u64(), Ordering::SeqCst);
    }

    /// Deliver every armed callout whose deadline has passed. Returns how
    /// many fired.
    fn fire_due() -> usize {
        let now = Self::now();
        let mut due = Vec::new();
        {
            let mut armed = ARMED.lock();
            armed.retain(|(deadline, callout)| {
                if *deadline <= now {
                    due.push(callout.clone());
                    false
                } else {
                    true
                }
            });
        }
        let count = due.len();
        for callout in due {
            callout.fire();
        }
        count
    }
}

impl Platform for NoParkPlatform {
    type Parker = ();

    fn current_parker() -> Self::Parker {}

    fn park(_parker: &Self::Parker) {
        if Self::fire_due() > 0 {
            return;
        }
        let earliest = ARMED.lock().iter().map(|(deadline, _)| *deadline).min();
        match earliest {
            Some(earliest) => {
                Self::warp_to(earliest);
                Self::fire_due();
            }
            // Tests share the armed list, so a concurrent park may have
            // delivered our callout already. Report a spurious wakeup and
            // let the caller re-check its status.
            None => std::thread::yield_now(),
        }
    }

    fn unpark(_parker: &Self::Parker) {}

    fn now() -> Timestamp {
        Timestamp::new(NOW.load(Ordering::SeqCst))
    }

    fn arm(deadline: Timestamp, callout: Callout<Self>) {
        ARMED.lock().push((deadline, callout));
    }

    fn cpu_id() -> usize {
        static NEXT_CPU: AtomicUsize = AtomicUsize::new(0);
        std::thread_local! {
            static CPU: usize = NEXT_CPU.fetch_add(1, Ordering::Relaxed);
        }
        CPU.with(|cpu| *cpu)
    }

    unsafe fn enter_lock() {}

    unsafe fn exit_lock() {}
}
