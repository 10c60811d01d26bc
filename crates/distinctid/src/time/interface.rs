use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// A trait for wall-clock time sources.
///
/// This abstraction allows plugging in the real system clock or a mocked time
/// source in tests. The unit is **milliseconds since the Unix epoch**; the
/// value is signed so that clocks set before 1970 are representable instead of
/// panicking.
///
/// # Example
///
/// ```
/// use distinctid::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> i64 {
///         1_735_689_600_000
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1_735_689_600_000);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn current_millis(&self) -> i64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> i64 {
        (**self).current_millis()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn current_millis(&self) -> i64 {
        (**self).current_millis()
    }
}

/// The system wall clock.
///
/// Unlike a monotonic clock this follows NTP and manual adjustments, which is
/// required here: the time delta embedded in every ID is relative to a
/// calendar date.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_millis() as i64,
            Err(before) => -(before.duration().as_millis() as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2025() {
        // 2025-01-01T00:00:00Z
        assert!(SystemClock.current_millis() > 1_735_689_600_000);
    }

    #[test]
    fn shared_clock_delegates() {
        let clock = Arc::new(SystemClock);
        let before = SystemClock.current_millis();
        assert!(clock.current_millis() >= before);
    }
}
