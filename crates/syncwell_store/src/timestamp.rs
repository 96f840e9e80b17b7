// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wall-clock readings for persisted timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

use tick::Clock;
use tick::runtime::InactiveClock;

/// Returns a clock that follows the system clock.
///
/// Only wall-clock reads are taken from it, so it runs without a timer driver and can be
/// created outside an async runtime. Use `Clock::new_tokio` when timers are needed as well.
///
/// # Examples
///
/// ```
/// use syncwell_store::{system_clock, unix_millis};
///
/// let clock = system_clock();
/// assert!(unix_millis(&clock) > 0);
/// ```
#[must_use]
pub fn system_clock() -> Clock {
    let (clock, _driver) = InactiveClock::default().activate();
    clock
}

/// Reads `clock` as milliseconds since the Unix epoch.
///
/// Entry timestamps are persisted, so they are absolute rather than monotonic. Times before
/// the epoch read as zero.
#[must_use]
pub fn unix_millis(clock: &Clock) -> u64 {
    to_unix_millis(clock.system_time())
}

fn to_unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
