use std::sync::Arc;

use crate::error::Result;

/// The atomic counter contract the allocation engine is written against.
///
/// Both operations return the **new** total after the addition and must be
/// linearizable with respect to every other caller of the same key, including
/// callers in other processes. Implementations report connection failures and
/// timeouts as [`Error::BackendUnavailable`] and never retry internally.
///
/// [`Error::BackendUnavailable`]: crate::Error::BackendUnavailable
pub trait CounterBackend {
    /// Atomically adds one to `key` and returns the new total.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot complete the increment.
    fn increment(&self, key: &str) -> Result<u64> {
        self.increment_by(key, 1)
    }

    /// Atomically adds `n` to `key` and returns the new total.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot complete the increment.
    fn increment_by(&self, key: &str, n: u64) -> Result<u64>;
}

impl<B: CounterBackend + ?Sized> CounterBackend for Arc<B> {
    fn increment(&self, key: &str) -> Result<u64> {
        (**self).increment(key)
    }

    fn increment_by(&self, key: &str, n: u64) -> Result<u64> {
        (**self).increment_by(key, n)
    }
}

impl<B: CounterBackend + ?Sized> CounterBackend for &B {
    fn increment(&self, key: &str) -> Result<u64> {
        (**self).increment(key)
    }

    fn increment_by(&self, key: &str, n: u64) -> Result<u64> {
        (**self).increment_by(key, n)
    }
}

/// The suspension-capable counterpart of [`CounterBackend`].
///
/// Same contract; the calling task is suspended instead of blocked while the
/// backend round trip is in flight.
#[cfg_attr(docsrs, doc(cfg(feature = "async-tokio")))]
#[cfg(feature = "async-tokio")]
pub trait AsyncCounterBackend {
    /// Returns a future that atomically adds one to `key` and resolves to the
    /// new total.
    ///
    /// # Errors
    ///
    /// The future resolves to an error if the backend cannot complete the
    /// increment.
    fn increment_async(&self, key: &str) -> impl Future<Output = Result<u64>> + Send {
        self.increment_by_async(key, 1)
    }

    /// Returns a future that atomically adds `n` to `key` and resolves to the
    /// new total.
    ///
    /// # Errors
    ///
    /// The future resolves to an error if the backend cannot complete the
    /// increment.
    fn increment_by_async(&self, key: &str, n: u64) -> impl Future<Output = Result<u64>> + Send;
}

#[cfg(feature = "async-tokio")]
impl<B: AsyncCounterBackend> AsyncCounterBackend for Arc<B> {
    fn increment_async(&self, key: &str) -> impl Future<Output = Result<u64>> + Send {
        (**self).increment_async(key)
    }

    fn increment_by_async(&self, key: &str, n: u64) -> impl Future<Output = Result<u64>> + Send {
        (**self).increment_by_async(key, n)
    }
}
