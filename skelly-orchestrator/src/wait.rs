//! Wait tiers for flag polling.
//!
//! The hot awaits inside a multi-frame cycle spin with a 1µs pause; coarser
//! boundaries (camera-ready, initial trigger) use 10ms and announce
//! themselves at a 1s cadence. Platform-native waits could replace these
//! without changing observable semantics.

use std::time::Duration;

pub const WAIT_FAST: Duration = Duration::from_micros(1);
pub const WAIT_SLOW: Duration = Duration::from_millis(10);
pub const WAIT_VERY_SLOW: Duration = Duration::from_secs(1);

pub fn wait_fast() {
    std::thread::sleep(WAIT_FAST);
}

pub fn wait_slow() {
    std::thread::sleep(WAIT_SLOW);
}
