//! Time points, clocks, and the one-shot timer driver.
//!
//! This module provides the time plumbing behind deadline nodes:
//! - [`Time`]: a nanosecond-resolution time point relative to a clock epoch
//! - [`TimeSource`]: clock abstraction with [`WallClock`] (production) and
//!   [`VirtualClock`] (deterministic tests) implementations
//! - [`TimerDriver`]: one-shot callback registration ordered by deadline
//!
//! A process-wide wall-clock driver backs deadline contexts; its worker
//! thread sleeps until the next registered deadline and fires due callbacks.
//! [`now`] reads that driver's clock, so deadlines constructed from it share
//! a single epoch.

mod clock;
mod driver;

pub use clock::{Time, TimeSource, VirtualClock, WallClock};
pub use driver::{TimerDriver, TimerHandle};

pub(crate) use driver::wall_timer;

/// Returns the current time on the process-wide wall clock.
#[must_use]
pub fn now() -> Time {
    wall_timer().now()
}
