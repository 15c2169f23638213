//! [`Platform`] implementation on plain host threads
//!
//! The framework never calls a scheduler or timer directly; every such call
//! goes through the [`Platform`] trait. This crate implements that trait on
//! top of the host operating system, which is enough to run the whole
//! wait/signal engine inside ordinary `cargo test` processes:
//!
//! * `park`/`unpark` land on [`std::thread::park`] and
//!   [`std::thread::Thread::unpark`], which already carry the permit
//!   semantics the trait demands.
//! * The clock counts nanoseconds since the first use of the platform,
//!   measured with [`std::time::Instant`].
//! * Timer hardware is a single background thread draining a
//!   deadline-ordered heap of armed callouts.
//!
//! The framework's integration test suite lives in this crate, since
//! exercising real sleeps and wakeups needs real threads.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    sync::{Condvar, Mutex, OnceLock},
    thread,
    time::Instant,
};

use log::trace;
use ponzu::{Callout, Platform, Timestamp};

/// [`Platform`] implementation on top of host threads.
///
/// Every host thread counts as its own cpu; preemption control is a no-op
/// because host threads cannot disable it anyway.
pub struct HostPlatform;

/// First use of the platform, the zero point of the host clock.
static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

impl Platform for HostPlatform {
    type Parker = thread::Thread;

    fn current_parker() -> Self::Parker {
        thread::current()
    }

    fn park(parker: &Self::Parker) {
        debug_assert_eq!(
            parker.id(),
            thread::current().id(),
            "a thread can only park itself"
        );
        thread::park();
    }

    fn unpark(parker: &Self::Parker) {
        parker.unpark();
    }

    fn now() -> Timestamp {
        Timestamp::new(epoch().elapsed().as_nanos() as u64)
    }

    fn arm(deadline: Timestamp, callout: Callout<Self>) {
        timer_wheel().arm(deadline, callout);
    }

    fn cpu_id() -> usize {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static NEXT_CPU: AtomicUsize = AtomicUsize::new(0);
        thread_local! {
            static CPU: usize = NEXT_CPU.fetch_add(1, Ordering::Relaxed);
        }
        CPU.with(|cpu| *cpu)
    }

    unsafe fn enter_lock() {}

    unsafe fn exit_lock() {}
}

/// A callout waiting for its deadline on the timer thread.
struct ArmedCallout {
    deadline: Timestamp,
    callout: Callout<HostPlatform>,
}

impl PartialEq for ArmedCallout {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for ArmedCallout {}

impl PartialOrd for ArmedCallout {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArmedCallout {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so the BinaryHeap serves the earliest deadline first.
        other.deadline.cmp(&self.deadline)
    }
}

/// The stand-in for timer hardware: a min-heap of armed callouts and one
/// thread delivering their fires.
struct TimerWheel {
    queue: Mutex<BinaryHeap<ArmedCallout>>,
    wakeup: Condvar,
}

impl TimerWheel {
    fn arm(&self, deadline: Timestamp, callout: Callout<HostPlatform>) {
        trace!("arming host timer for {deadline:?}");
        self.queue
            .lock()
            .unwrap()
            .push(ArmedCallout { deadline, callout });
        self.wakeup.notify_one();
    }
}

fn timer_wheel() -> &'static TimerWheel {
    static WHEEL: OnceLock<TimerWheel> = OnceLock::new();
    WHEEL.get_or_init(|| {
        thread::Builder::new()
            .name("ponzu-timer".into())
            .spawn(timer_thread)
            .expect("failed to spawn the timer thread");
        TimerWheel {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
        }
    })
}

/// Deliver fires at their deadlines. Fires run without the queue lock held;
/// a fire takes framework spinlocks and may unpark waiters.
fn timer_thread() {
    let wheel = timer_wheel();
    let mut queue = wheel.queue.lock().unwrap();
    loop {
        let now = HostPlatform::now();
        let mut due = Vec::new();
        while queue
            .peek()
            .is_some_and(|armed| armed.deadline <= now)
        {
            due.push(queue.pop().expect("peeked entry vanished"));
        }
        if !due.is_empty() {
            drop(queue);
            for armed in due {
                armed.callout.fire();
            }
            queue = wheel.queue.lock().unwrap();
            continue;
        }

        queue = match queue.peek() {
            Some(next) => {
                let wait = next.deadline - now;
                let wait = std::time::Duration::from_nanos(wait.as_i64() as u64);
                wheel.wakeup.wait_timeout(queue, wait).unwrap().0
            }
            None => wheel.wakeup.wait(queue).unwrap(),
        };
    }
}
