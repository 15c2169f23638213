//! Helpers shared by the integration test binaries
#![allow(dead_code)]

use std::time::{Duration as StdDuration, Instant};

use ponzu::{Deadline, Duration, Platform, Thread};
use ponzu_host::HostPlatform;

/// A framework thread handle on the host platform.
pub type KThread = Thread<HostPlatform>;

/// Route framework `trace!`/`debug!` output into the test harness.
///
/// Safe to call from every test; later calls find the logger already
/// installed and do nothing.
pub fn init() {
    let _ = env_logger::builder()
        .is_test(true)
        .parse_default_env()
        .try_init();
}

/// Spawn a host thread, register it with the framework and run `f` with its
/// handle.
pub fn spawn<T: Send + 'static>(
    name: &'static str,
    f: impl FnOnce(&KThread) -> T + Send + 'static,
) -> std::thread::JoinHandle<T> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let thread = KThread::new(name);
            f(&thread)
        })
        .expect("failed to spawn test thread")
}

/// Poll `cond` until it holds, failing the test after a generous timeout.
#[track_caller]
pub fn eventually(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < StdDuration::from_secs(5),
            "timed out waiting until {what}"
        );
        std::thread::sleep(StdDuration::from_millis(1));
    }
}

/// An absolute deadline `ms` milliseconds from now.
pub fn deadline_in_ms(ms: i64) -> Deadline {
    Deadline::At(HostPlatform::now() + Duration::from_millis(ms))
}
