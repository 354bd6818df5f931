use core::time::Duration;
use std::sync::Arc;

/// Epoch used by the order ID layout: Monday, January 1, 2024 00:00:00 UTC.
///
/// The timestamp half of every generated ID counts seconds from this instant,
/// so moving it would make new IDs collide with ones already handed out.
pub const ORDER_EPOCH: Duration = Duration::from_secs(1_704_067_200);

/// A trait for time sources that return wall-clock aligned timestamps.
///
/// This abstraction allows you to plug in the system clock, a monotonic timer,
/// or a hand-driven clock in tests. Every time-dependent component (promotion
/// windows, lock expiry, stream entry ids, ID buckets) takes its clock
/// explicitly instead of reading ambient time.
///
/// The unit is **milliseconds since the Unix epoch**.
///
/// # Example
///
/// ```
/// use flashsale::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_millis(), 1234);
/// assert_eq!(time.current_secs(), 1);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn current_millis(&self) -> u64;

    /// Returns the current time in whole seconds since the Unix epoch.
    fn current_secs(&self) -> u64 {
        self.current_millis() / 1_000
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}
