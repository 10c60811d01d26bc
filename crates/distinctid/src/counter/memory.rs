use core::sync::atomic::Ordering;
use std::collections::HashMap;

use parking_lot::Mutex;
use portable_atomic::AtomicU64;

#[cfg(feature = "async-tokio")]
use crate::counter::AsyncCounterBackend;
use crate::{
    counter::CounterBackend,
    error::{Error, Result},
};

/// An in-process counter backend.
///
/// Counters live in a map behind a single lock, so increments are atomic
/// across threads but not across processes. Useful as the backend of a
/// single-process service and for presetting or inspecting counters in tests.
///
/// # Example
///
/// ```
/// use distinctid::{CounterBackend, MemoryCounter};
///
/// let counter = MemoryCounter::new();
/// counter.set("orders", 1023);
/// assert_eq!(counter.increment("orders").unwrap(), 1024);
/// assert_eq!(counter.increment_by("orders", 10).unwrap(), 1034);
/// ```
#[derive(Debug, Default)]
pub struct MemoryCounter {
    counters: Mutex<HashMap<String, u64>>,
    increment_calls: AtomicU64,
    increment_by_calls: AtomicU64,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the value of `key`.
    pub fn set(&self, key: &str, value: u64) {
        self.counters.lock().insert(key.to_owned(), value);
    }

    /// Returns the current value of `key` (zero if never incremented).
    pub fn get(&self, key: &str) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }

    /// Number of [`CounterBackend::increment`] calls served so far.
    pub fn increment_calls(&self) -> u64 {
        self.increment_calls.load(Ordering::Relaxed)
    }

    /// Number of [`CounterBackend::increment_by`] calls served so far.
    pub fn increment_by_calls(&self) -> u64 {
        self.increment_by_calls.load(Ordering::Relaxed)
    }

    fn add(&self, key: &str, n: u64) -> Result<u64> {
        let mut counters = self.counters.lock();
        let value = counters.entry(key.to_owned()).or_insert(0);
        *value = value
            .checked_add(n)
            .ok_or_else(|| Error::backend(format!("counter `{key}` overflowed")))?;
        Ok(*value)
    }
}

impl CounterBackend for MemoryCounter {
    fn increment(&self, key: &str) -> Result<u64> {
        self.increment_calls.fetch_add(1, Ordering::Relaxed);
        self.add(key, 1)
    }

    fn increment_by(&self, key: &str, n: u64) -> Result<u64> {
        self.increment_by_calls.fetch_add(1, Ordering::Relaxed);
        self.add(key, n)
    }
}

#[cfg(feature = "async-tokio")]
impl AsyncCounterBackend for MemoryCounter {
    fn increment_async(&self, key: &str) -> impl Future<Output = Result<u64>> + Send {
        core::future::ready(CounterBackend::increment(self, key))
    }

    fn increment_by_async(&self, key: &str, n: u64) -> impl Future<Output = Result<u64>> + Send {
        core::future::ready(CounterBackend::increment_by(self, key, n))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread::scope};

    use super::*;

    #[test]
    fn starts_at_zero_and_returns_new_totals() {
        let counter = MemoryCounter::new();
        assert_eq!(counter.get("k"), 0);
        assert_eq!(counter.increment("k").unwrap(), 1);
        assert_eq!(counter.increment_by("k", 9).unwrap(), 10);
        assert_eq!(counter.get("k"), 10);
        assert_eq!(counter.get("other"), 0);
        assert_eq!(counter.increment_calls(), 1);
        assert_eq!(counter.increment_by_calls(), 1);
    }

    #[test]
    fn set_presets_a_key() {
        let counter = MemoryCounter::new();
        counter.set("k", 1023);
        assert_eq!(counter.increment("k").unwrap(), 1024);
    }

    #[test]
    fn overflow_is_a_backend_error() {
        let counter = MemoryCounter::new();
        counter.set("k", u64::MAX);
        assert!(matches!(
            counter.increment("k"),
            Err(Error::BackendUnavailable { .. })
        ));
        assert_eq!(counter.get("k"), u64::MAX);
    }

    #[test]
    fn increments_are_atomic_across_threads() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;

        let counter = Arc::new(MemoryCounter::new());
        let seen = Mutex::new(HashSet::with_capacity(THREADS * PER_THREAD));

        scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..PER_THREAD {
                        let value = counter.increment("shared").unwrap();
                        assert!(seen.lock().insert(value));
                    }
                });
            }
        });

        assert_eq!(counter.get("shared"), (THREADS * PER_THREAD) as u64);
        assert_eq!(seen.lock().len(), THREADS * PER_THREAD);
    }

    #[cfg(feature = "async-tokio")]
    #[tokio::test]
    async fn async_increments_share_state_with_sync() {
        let counter = MemoryCounter::new();
        assert_eq!(counter.increment_async("k").await.unwrap(), 1);
        assert_eq!(CounterBackend::increment(&counter, "k").unwrap(), 2);
        assert_eq!(counter.increment_by_async("k", 3).await.unwrap(), 5);
    }
}
