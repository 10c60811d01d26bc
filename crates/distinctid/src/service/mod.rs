//! The ID composer: validates input, obtains counter values and packs them
//! with the current time delta and shard.

use core::num::NonZeroU64;
use std::sync::Arc;

use parking_lot::RwLock;
#[cfg(feature = "tracing")]
use tracing::instrument;

#[cfg(feature = "async-tokio")]
use crate::counter::AsyncCounterBackend;
use crate::{
    buffer::BufferPool,
    counter::CounterBackend,
    error::{Error, Result},
    id::{DistinctId, SEQUENCE_SPACE, compose_batch, range_start, validate_count, validate_shard},
    metrics::{Metrics, MetricsSnapshot},
    time::{EpochCache, SystemClock, TimeSource},
};


/// Counter key used when callers have no key of their own.
pub const DEFAULT_COUNTER_KEY: &str = "distinctid";

/// Generates [`DistinctId`]s from a counter backend and a clock.
///
/// The service owns the epoch cache, the optional per-key buffers and the
/// metrics; the backend and clock are injected. It is `Sync` whenever its
/// backend and clock are, and is meant to be shared (for example behind an
/// [`Arc`]) by every caller in a process.
///
/// Buffering is off by default: every single-ID request costs one
/// `increment`. With buffering on, counter values are reserved in blocks of
/// the configured size and served from memory. Batches always reserve their
/// range with a single `increment_by` and never go through the buffer.
///
/// # Example
///
/// ```
/// use distinctid::{IdService, MemoryCounter};
///
/// let service = IdService::new(MemoryCounter::new());
/// service.enable_buffering(100)?;
///
/// let id = service.generate_one(7, "orders")?;
/// assert_eq!(id.shard_id(), 7);
/// assert_eq!(id.sequence(), 1);
///
/// let batch = service.generate_batch(3, 7, "invoices")?;
/// assert_eq!(batch.len(), 3);
/// # Ok::<(), distinctid::Error>(())
/// ```
pub struct IdService<B, T = SystemClock> {
    backend: B,
    clock: T,
    epoch: EpochCache,
    buffers: RwLock<Option<Arc<BufferPool>>>,
    metrics: Metrics,
}

impl<B> IdService<B> {
    /// Creates a service reading the system clock, with buffering and metrics
    /// disabled.
    pub fn new(backend: B) -> Self {
        Self::with_clock(backend, SystemClock)
    }
}

impl<B, T> IdService<B, T> {
    /// Creates a service using `clock` as its time source.
    pub fn with_clock(backend: B, clock: T) -> Self {
        Self {
            backend,
            clock,
            epoch: EpochCache::new(),
            buffers: RwLock::new(None),
            metrics: Metrics::new(),
        }
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Turns on local buffering with blocks of `buffer_size` counter values.
    ///
    /// Any previous buffer state is discarded, along with the counter values
    /// it had reserved but not yet served.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `buffer_size` is zero.
    pub fn enable_buffering(&self, buffer_size: u64) -> Result<()> {
        let size = NonZeroU64::new(buffer_size)
            .ok_or_else(|| Error::configuration("buffer size must be positive, got 0"))?;
        *self.buffers.write() = Some(Arc::new(BufferPool::new(size)));

        #[cfg(feature = "tracing")]
        tracing::info!(buffer_size, "buffering enabled");

        Ok(())
    }

    /// Turns off local buffering. Unserved reserved values are discarded.
    pub fn disable_buffering(&self) {
        *self.buffers.write() = None;

        #[cfg(feature = "tracing")]
        tracing::info!("buffering disabled");
    }

    pub fn is_buffering(&self) -> bool {
        self.buffers.read().is_some()
    }

    /// The configured block size, or `None` while buffering is off.
    pub fn buffer_size(&self) -> Option<u64> {
        self.buffers.read().as_ref().map(|pool| pool.buffer_size())
    }

    /// Drops the buffer kept for `counter_key`, along with any values it had
    /// reserved but not served. Returns `false` if buffering is off or the key
    /// had no buffer.
    ///
    /// Buffers are kept per key until evicted, so services fed an open-ended
    /// set of keys should evict keys they no longer use.
    pub fn evict_buffer(&self, counter_key: &str) -> bool {
        self.buffer_pool().is_some_and(|pool| pool.evict(counter_key))
    }

    /// Turns metric recording on or off. Counters keep their values across
    /// toggles.
    pub fn enable_metrics(&self, enabled: bool) {
        self.metrics.set_enabled(enabled);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    fn buffer_pool(&self) -> Option<Arc<BufferPool>> {
        self.buffers.read().clone()
    }

    fn backend_failed(&self, _operation: &'static str, _err: &Error) {
        self.metrics.record_failure();

        #[cfg(feature = "tracing")]
        tracing::warn!(operation = _operation, error = %_err, "counter allocation failed");
    }
}

impl<B, T> IdService<B, T>
where
    T: TimeSource,
{
    /// Start of the current UTC year in Unix milliseconds.
    pub fn epoch_base(&self) -> i64 {
        self.epoch.get(self.clock.current_millis())
    }

    /// Milliseconds elapsed since the start of the current UTC year.
    ///
    /// Negative if the clock reads earlier than the cached epoch base would
    /// allow, which cannot happen with a clock that stays in one year.
    pub fn time_delta(&self) -> i64 {
        let now = self.clock.current_millis();
        now - self.epoch.get(now)
    }
}

impl<B, T> IdService<B, T>
where
    B: CounterBackend,
    T: TimeSource,
{
    /// Generates one identifier for `shard_id` from the counter at
    /// `counter_key`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidShard`] if `shard_id` is outside `0..=8191`; the
    ///   counter is not touched.
    /// - Any backend error, unchanged.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn generate_one(&self, shard_id: i64, counter_key: &str) -> Result<DistinctId> {
        let shard_id = validate_shard(shard_id)?;
        let started = self.metrics.start();

        let counter_value = self
            .next_counter_value(counter_key)
            .inspect_err(|err| self.backend_failed("generate_one", err))?;
        let id = DistinctId::from_components(self.time_delta(), shard_id, counter_value);

        self.metrics.record_ids(1);
        self.metrics.finish("generate_one", 1, started);
        Ok(id)
    }

    /// Generates `count` identifiers for `shard_id` from one reservation of
    /// `count` consecutive counter values.
    ///
    /// All identifiers share one time delta and are returned in allocation
    /// order. Batches larger than 1024 repeat identifiers, since the sequence
    /// field only holds the counter modulo 1024.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCount`] if `count <= 0`, then [`Error::InvalidShard`]
    ///   for a bad shard; the counter is not touched in either case.
    /// - Any backend error, unchanged. No partial batch is returned.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn generate_batch(
        &self,
        count: i64,
        shard_id: i64,
        counter_key: &str,
    ) -> Result<Vec<DistinctId>> {
        let count = validate_count(count)?;
        let shard_id = validate_shard(shard_id)?;
        warn_if_oversized(count);
        let started = self.metrics.start();

        let new_total = self
            .backend
            .increment_by(counter_key, count)
            .inspect_err(|err| self.backend_failed("generate_batch", err))?;
        self.metrics.record_backend_call(false);
        let start = range_start(new_total, count)?;
        let ids = compose_batch(self.time_delta(), shard_id, start, count);

        self.metrics.record_ids(count);
        self.metrics.finish("generate_batch", count, started);
        Ok(ids)
    }

    fn next_counter_value(&self, key: &str) -> Result<u64> {
        match self.buffer_pool() {
            Some(pool) => {
                let served = pool.buffer_for(key).next_value(&self.backend, key)?;
                if served.refilled {
                    self.metrics.record_backend_call(true);
                }
                Ok(served.value)
            }
            None => {
                let value = self.backend.increment(key)?;
                self.metrics.record_backend_call(false);
                Ok(value)
            }
        }
    }
}

#[cfg(feature = "async-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "async-tokio")))]
impl<B, T> IdService<B, T>
where
    B: AsyncCounterBackend + Sync,
    T: TimeSource + Sync,
{
    /// Async counterpart of [`IdService::generate_one`]. Only the backend call
    /// is awaited.
    ///
    /// # Errors
    ///
    /// Same as [`IdService::generate_one`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn generate_one_async(&self, shard_id: i64, counter_key: &str) -> Result<DistinctId> {
        let shard_id = validate_shard(shard_id)?;
        let started = self.metrics.start();

        let counter_value = self
            .next_counter_value_async(counter_key)
            .await
            .inspect_err(|err| self.backend_failed("generate_one_async", err))?;
        let id = DistinctId::from_components(self.time_delta(), shard_id, counter_value);

        self.metrics.record_ids(1);
        self.metrics.finish("generate_one_async", 1, started);
        Ok(id)
    }

    /// Async counterpart of [`IdService::generate_batch`].
    ///
    /// # Errors
    ///
    /// Same as [`IdService::generate_batch`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub async fn generate_batch_async(
        &self,
        count: i64,
        shard_id: i64,
        counter_key: &str,
    ) -> Result<Vec<DistinctId>> {
        let count = validate_count(count)?;
        let shard_id = validate_shard(shard_id)?;
        warn_if_oversized(count);
        let started = self.metrics.start();

        let new_total = self
            .backend
            .increment_by_async(counter_key, count)
            .await
            .inspect_err(|err| self.backend_failed("generate_batch_async", err))?;
        self.metrics.record_backend_call(false);
        let start = range_start(new_total, count)?;
        let ids = compose_batch(self.time_delta(), shard_id, start, count);

        self.metrics.record_ids(count);
        self.metrics.finish("generate_batch_async", count, started);
        Ok(ids)
    }

    async fn next_counter_value_async(&self, key: &str) -> Result<u64> {
        match self.buffer_pool() {
            Some(pool) => {
                let served = pool.buffer_for(key).next_value_async(&self.backend, key).await?;
                if served.refilled {
                    self.metrics.record_backend_call(true);
                }
                Ok(served.value)
            }
            None => {
                let value = self.backend.increment_async(key).await?;
                self.metrics.record_backend_call(false);
                Ok(value)
            }
        }
    }
}

fn warn_if_oversized(count: u64) {
    if count > SEQUENCE_SPACE {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            count,
            sequence_space = SEQUENCE_SPACE,
            "batch exceeds the sequence space; identifiers will repeat"
        );
    }
}

impl<B, T> core::fmt::Debug for IdService<B, T>
where
    B: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdService")
            .field("backend", &self.backend)
            .field("buffer_size", &self.buffer_size())
            .field("metrics_enabled", &self.metrics.is_enabled())
            .finish_non_exhaustive()
    }
}
