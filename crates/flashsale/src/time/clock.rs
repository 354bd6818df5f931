use crate::TimeSource;
use core::time::Duration;
use portable_atomic::{AtomicU64, Ordering};
use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// Reads `SystemTime::now()` on every call.
///
/// Subject to wall-clock adjustments (NTP slews, manual changes). Prefer
/// [`MonotonicClock`] for long-running processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A monotonic time source anchored to the wall clock at construction.
///
/// The wall-clock reading is captured once; afterwards time advances by the
/// elapsed [`Instant`] only, so the clock never goes backward even if the
/// system clock is adjusted externally. Clones share the same anchor.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    start: Instant,
    anchor_millis: u64,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Anchors a new clock at the current wall-clock time.
    pub fn new() -> Self {
        Self::with_anchor(SystemClock.current_millis())
    }

    /// Anchors a new clock at an explicit Unix timestamp in milliseconds.
    pub fn with_anchor(anchor_millis: u64) -> Self {
        Self {
            start: Instant::now(),
            anchor_millis,
        }
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.anchor_millis + self.start.elapsed().as_millis() as u64
    }
}

/// A hand-driven clock for tests and simulations.
///
/// All clones observe the same instant; [`ManualClock::advance`] and
/// [`ManualClock::set_millis`] are visible to every holder immediately.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use flashsale::{ManualClock, TimeSource};
///
/// let clock = ManualClock::new(1_000);
/// let shared = clock.clone();
/// clock.advance(Duration::from_millis(500));
/// assert_eq!(shared.current_millis(), 1_500);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(millis)),
        }
    }

    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::Release);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::AcqRel);
    }
}

impl TimeSource for ManualClock {
    fn current_millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}
