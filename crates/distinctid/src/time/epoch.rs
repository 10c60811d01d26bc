use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parking_lot::RwLock;

/// Returns milliseconds since the Unix epoch at Jan 1, 00:00:00 UTC of `year`.
///
/// # Example
///
/// ```
/// assert_eq!(distinctid::epoch_base_for_year(2025), 1_735_689_600_000);
/// ```
pub fn epoch_base_for_year(year: i32) -> i64 {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map_or(0, |start| start.and_utc().timestamp_millis())
}

/// Returns the UTC calendar year containing `millis`.
pub fn year_of(millis: i64) -> i32 {
    DateTime::<Utc>::from_timestamp_millis(millis).map_or(1970, |dt| dt.year())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CachedEpoch {
    year: i32,
    base: i64,
}

/// Memoizes the start-of-year epoch base.
///
/// The cache holds a single `(year, base)` pair and is recomputed whenever it
/// is asked about an instant in a different year. The year is derived from the
/// same timestamp the caller embeds in the ID, so a time delta is never
/// computed against the base of a neighbouring year.
///
/// Reads take a shared lock; recomputation takes the write lock and re-checks,
/// so concurrent callers at a year boundary agree on a single value.
#[derive(Debug, Default)]
pub struct EpochCache {
    cached: RwLock<Option<CachedEpoch>>,
}

impl EpochCache {
    /// Creates an empty cache. The first [`EpochCache::get`] populates it.
    pub const fn new() -> Self {
        Self {
            cached: RwLock::new(None),
        }
    }

    /// Returns the epoch base for the year containing `now_millis`.
    pub fn get(&self, now_millis: i64) -> i64 {
        let year = year_of(now_millis);
        if let Some(cached) = *self.cached.read() {
            if cached.year == year {
                return cached.base;
            }
        }
        self.refresh(year)
    }

    /// Returns the year currently cached, if any.
    pub fn cached_year(&self) -> Option<i32> {
        let cached = *self.cached.read();
        cached.map(|cached| cached.year)
    }

    #[cold]
    #[inline(never)]
    fn refresh(&self, year: i32) -> i64 {
        let mut cached = self.cached.write();
        if let Some(current) = *cached {
            if current.year == year {
                return current.base;
            }
        }

        let base = epoch_base_for_year(year);
        *cached = Some(CachedEpoch { year, base });

        #[cfg(feature = "tracing")]
        tracing::debug!(year, epoch_base = base, "recomputed epoch base");

        base
    }
}
