use std::time::{Duration, Instant};

pub(crate) mod counter_app;

pub(crate) mod ledger;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod node;

pub(crate) mod snapshots;

/// Poll `condition` until it holds, panicking if it does not within 10 seconds.
pub(crate) fn wait_until(description: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        if Instant::now() >= deadline {
            panic!("timed out waiting until: {}", description);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
