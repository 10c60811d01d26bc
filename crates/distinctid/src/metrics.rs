//! Opt-in allocation counters.

use core::sync::atomic::Ordering;
use std::time::Instant;

use portable_atomic::{AtomicBool, AtomicU64};

/// Counters describing the work an [`IdService`](crate::IdService) has done
/// since metrics were enabled.
///
/// Recording is a no-op while metrics are disabled.
#[derive(Debug, Default)]
pub struct Metrics {
    enabled: AtomicBool,
    ids_generated: AtomicU64,
    backend_calls: AtomicU64,
    buffer_refills: AtomicU64,
    failures: AtomicU64,
}

/// A point-in-time copy of [`Metrics`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ids_generated: u64,
    pub backend_calls: u64,
    pub buffer_refills: u64,
    pub failures: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            ids_generated: AtomicU64::new(0),
            backend_calls: AtomicU64::new(0),
            buffer_refills: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn record_ids(&self, n: u64) {
        if self.is_enabled() {
            self.ids_generated.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Records one backend round trip, and a refill if it filled a buffer.
    pub fn record_backend_call(&self, refill: bool) {
        if self.is_enabled() {
            self.backend_calls.fetch_add(1, Ordering::Relaxed);
            if refill {
                self.buffer_refills.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_failure(&self) {
        if self.is_enabled() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ids_generated: self.ids_generated.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            buffer_refills: self.buffer_refills.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter without changing whether recording is enabled.
    pub fn reset(&self) {
        self.ids_generated.store(0, Ordering::Relaxed);
        self.backend_calls.store(0, Ordering::Relaxed);
        self.buffer_refills.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }

    /// Starts timing an operation when metrics are enabled.
    pub(crate) fn start(&self) -> Option<Instant> {
        self.is_enabled().then(Instant::now)
    }

    /// Logs the elapsed time of an operation started with [`Metrics::start`].
    pub(crate) fn finish(&self, _operation: &'static str, _count: u64, started: Option<Instant>) {
        let Some(_started) = started else {
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            target: "distinctid::metrics",
            operation = _operation,
            count = _count,
            elapsed_us = _started.elapsed().as_micros() as u64,
            "generated ids"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_record_nothing() {
        let metrics = Metrics::new();
        metrics.record_ids(5);
        metrics.record_backend_call(true);
        metrics.record_failure();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
        assert!(metrics.start().is_none());
    }

    #[test]
    fn enabled_metrics_accumulate() {
        let metrics = Metrics::new();
        metrics.set_enabled(true);
        metrics.record_ids(5);
        metrics.record_ids(1);
        metrics.record_backend_call(false);
        metrics.record_backend_call(true);
        metrics.record_failure();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                ids_generated: 6,
                backend_calls: 2,
                buffer_refills: 1,
                failures: 1,
            }
        );

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
        assert!(metrics.is_enabled());
    }
}
