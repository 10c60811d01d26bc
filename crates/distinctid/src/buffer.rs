//! Local pre-allocation of counter values.
//!
//! An [`IdBuffer`] reserves `buffer_size` consecutive counter values with a
//! single `increment_by` and serves them from memory until exhausted. A
//! [`BufferPool`] keeps one buffer per counter key.

use core::{num::NonZeroU64, sync::atomic::Ordering};
use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use portable_atomic::AtomicU64;
#[cfg(feature = "async-tokio")]
use tokio::sync::Notify;

#[cfg(feature = "async-tokio")]
use crate::counter::AsyncCounterBackend;
use crate::{counter::CounterBackend, error::Result, id::range_start};

/// Reservation granularity used when none is given.
pub const DEFAULT_BUFFER_SIZE: u64 = 10_000;

#[derive(Debug)]
struct BufferState {
    /// Next value to hand out.
    current: u64,
    /// Last value reserved from the backend.
    high_water: u64,
    /// An async refill is awaiting the backend.
    #[cfg(feature = "async-tokio")]
    refilling: bool,
}

impl BufferState {
    const fn is_exhausted(&self) -> bool {
        self.current > self.high_water
    }

    fn install(&mut self, high_water: u64, buffer_size: u64) -> Result<()> {
        self.current = range_start(high_water, buffer_size)?;
        self.high_water = high_water;
        Ok(())
    }

    fn take(&mut self) -> u64 {
        debug_assert!(!self.is_exhausted());
        let value = self.current;
        self.current += 1;
        value
    }
}

/// A value served by [`IdBuffer`], noting whether serving it took a backend
/// round trip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Served {
    pub(crate) value: u64,
    pub(crate) refilled: bool,
}

/// A thread-safe cache of reserved counter values.
///
/// The check-refill-serve sequence runs under one lock, so values handed out
/// by a buffer are unique. With a single kind of caller they are also strictly
/// increasing and, as long as the buffer is the only consumer of its key,
/// contiguous across refills.
///
/// Synchronous callers hold the lock for the whole backend round trip and
/// never wait on an asynchronous refill. Asynchronous callers release the lock
/// while awaiting the backend and mark the buffer as refilling; other async
/// callers that find the buffer empty wait for that refill instead of issuing
/// their own. If a synchronous caller refilled the buffer in the meantime, the
/// async refill serves the first value of its own range and drops the rest,
/// leaving a gap in the counter but never a repeat.
///
/// # Example
///
/// ```
/// use core::num::NonZeroU64;
/// use distinctid::{IdBuffer, MemoryCounter};
///
/// let counter = MemoryCounter::new();
/// let buffer = IdBuffer::new(NonZeroU64::new(10).unwrap());
///
/// let values: Vec<u64> = (0..15)
///     .map(|_| buffer.next_sequence_value(&counter, "orders").unwrap())
///     .collect();
///
/// assert_eq!(values, (1..=15).collect::<Vec<_>>());
/// assert_eq!(counter.increment_by_calls(), 2);
/// ```
#[derive(Debug)]
pub struct IdBuffer {
    buffer_size: u64,
    state: Mutex<BufferState>,
    refills: AtomicU64,
    #[cfg(feature = "async-tokio")]
    refill_notify: Notify,
}

impl IdBuffer {
    /// Creates an empty buffer; the first request triggers a refill.
    pub fn new(buffer_size: NonZeroU64) -> Self {
        Self {
            buffer_size: buffer_size.get(),
            state: Mutex::new(BufferState {
                current: 1,
                high_water: 0,
                #[cfg(feature = "async-tokio")]
                refilling: false,
            }),
            refills: AtomicU64::new(0),
            #[cfg(feature = "async-tokio")]
            refill_notify: Notify::new(),
        }
    }

    pub const fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Values still available without a backend call.
    pub fn remaining(&self) -> u64 {
        let state = self.state.lock();
        state.high_water + 1 - state.current
    }

    /// Number of completed refills.
    pub fn refills(&self) -> u64 {
        self.refills.load(Ordering::Relaxed)
    }

    /// Returns the next reserved counter value, refilling from `backend` first
    /// if the buffer is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if a refill fails. The buffer is left
    /// exhausted and the next call refills again.
    pub fn next_sequence_value<B>(&self, backend: &B, key: &str) -> Result<u64>
    where
        B: CounterBackend + ?Sized,
    {
        self.next_value(backend, key).map(|served| served.value)
    }

    pub(crate) fn next_value<B>(&self, backend: &B, key: &str) -> Result<Served>
    where
        B: CounterBackend + ?Sized,
    {
        let mut state = self.state.lock();

        // An async refill in flight may be parked on this very thread, so it
        // is never waited for here.
        let refilled = state.is_exhausted();
        if refilled {
            let high_water = backend.increment_by(key, self.buffer_size)?;
            state.install(high_water, self.buffer_size)?;
            self.record_refill(key, high_water);

            #[cfg(feature = "async-tokio")]
            self.refill_notify.notify_waiters();
        }

        Ok(Served {
            value: state.take(),
            refilled,
        })
    }

    /// Async counterpart of [`IdBuffer::next_sequence_value`].
    ///
    /// Dropping the future while it awaits a refill is safe: waiting callers
    /// are released and one of them refills instead. Counter values reserved
    /// by the abandoned call are lost.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if a refill fails.
    #[cfg(feature = "async-tokio")]
    pub async fn next_sequence_value_async<B>(&self, backend: &B, key: &str) -> Result<u64>
    where
        B: AsyncCounterBackend + Sync,
    {
        self.next_value_async(backend, key)
            .await
            .map(|served| served.value)
    }

    #[cfg(feature = "async-tokio")]
    pub(crate) async fn next_value_async<B>(&self, backend: &B, key: &str) -> Result<Served>
    where
        B: AsyncCounterBackend + Sync,
    {
        loop {
            let notified = {
                let mut state = self.state.lock();
                if !state.is_exhausted() {
                    return Ok(Served {
                        value: state.take(),
                        refilled: false,
                    });
                }
                if !state.refilling {
                    state.refilling = true;
                    break;
                }
                // Registered before the lock is released, so the wakeup from
                // the in-flight refill cannot be missed.
                self.refill_notify.notified()
            };
            notified.await;
        }

        let _refilling = RefillGuard { buffer: self };
        let high_water = backend.increment_by_async(key, self.buffer_size).await?;

        let mut state = self.state.lock();
        if !state.is_exhausted() {
            // A synchronous caller refilled while this call was suspended.
            let value = range_start(high_water, self.buffer_size)?;

            #[cfg(feature = "tracing")]
            tracing::debug!(
                key,
                served = value,
                discarded_through = high_water,
                "buffer already refilled; dropping the rest of the reservation"
            );

            return Ok(Served {
                value,
                refilled: true,
            });
        }
        state.install(high_water, self.buffer_size)?;
        self.record_refill(key, high_water);
        Ok(Served {
            value: state.take(),
            refilled: true,
        })
    }

    fn record_refill(&self, _key: &str, _high_water: u64) {
        self.refills.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            key = _key,
            first = _high_water + 1 - self.buffer_size,
            last = _high_water,
            "refilled id buffer"
        );
    }
}

/// Clears the refilling flag and wakes waiters when an async refill ends,
/// whether it completed, failed or was dropped.
#[cfg(feature = "async-tokio")]
struct RefillGuard<'a> {
    buffer: &'a IdBuffer,
}

#[cfg(feature = "async-tokio")]
impl Drop for RefillGuard<'_> {
    fn drop(&mut self) {
        self.buffer.state.lock().refilling = false;
        self.buffer.refill_notify.notify_waiters();
    }
}

/// One [`IdBuffer`] per counter key, all with the same reservation size.
///
/// Keeping buffers apart per key means a value reserved from one counter is
/// never served for another.
///
/// The pool keeps a buffer for every key it has been asked about until the
/// key is evicted or the pool is dropped. Callers drawing from an unbounded
/// set of keys should [`evict`](BufferPool::evict) keys they are done with;
/// the unserved values of an evicted buffer are lost.
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: NonZeroU64,
    buffers: Mutex<HashMap<String, Arc<IdBuffer>>>,
}

impl BufferPool {
    pub fn new(buffer_size: NonZeroU64) -> Self {
        Self {
            buffer_size,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub const fn buffer_size(&self) -> u64 {
        self.buffer_size.get()
    }

    /// Returns the buffer for `key`, creating it on first use.
    pub fn buffer_for(&self, key: &str) -> Arc<IdBuffer> {
        let mut buffers = self.buffers.lock();
        if let Some(buffer) = buffers.get(key) {
            return Arc::clone(buffer);
        }
        let buffer = Arc::new(IdBuffer::new(self.buffer_size));
        buffers.insert(key.to_owned(), Arc::clone(&buffer));
        buffer
    }

    /// Drops the buffer for `key`. Returns `false` if there was none.
    ///
    /// Calls already holding the buffer finish against it; later calls start
    /// a fresh one.
    pub fn evict(&self, key: &str) -> bool {
        self.buffers.lock().remove(key).is_some()
    }

    /// Number of keys currently holding a buffer.
    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }

    /// Total refills across every buffer in the pool.
    pub fn refills(&self) -> u64 {
        self.buffers.lock().values().map(|buffer| buffer.refills()).sum()
    }
}
