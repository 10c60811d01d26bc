//! Error types for the ID allocation engine.
//!
//! Every fallible operation in this crate returns [`Error`]. Validation errors
//! ([`Error::InvalidShard`], [`Error::InvalidCount`]) are raised before the
//! counter backend is touched. Backend errors are surfaced as-is and never
//! retried.

use crate::id::MAX_SHARD_ID;

/// A result type defaulting to this crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `distinctid` can emit.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The shard ID does not fit the 13-bit shard field.
    #[error("shard_id must be in range 0-{max}, got {shard_id}", max = MAX_SHARD_ID)]
    InvalidShard { shard_id: i64 },

    /// A batch was requested with a non-positive count.
    #[error("count must be positive, got {count}")]
    InvalidCount { count: i64 },

    /// The counter backend could not complete the increment (connection
    /// failure, timeout or an unreadable counter).
    #[error("counter backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    /// A backend or service setting is unusable.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl Error {
    pub(crate) fn backend(reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            reason: reason.into(),
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Returns `true` if a caller may reasonably retry the failed operation.
    ///
    /// Only backend failures are transient; validation and configuration
    /// errors will fail the same way again.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::backend(err.to_string())
    }
}
