use core::fmt;

use crate::error::{Error, Result};

/// Number of bits to shift the time delta to its position (bit 23).
pub const TIME_DELTA_SHIFT: u32 = 23;

/// Number of bits to shift the shard ID to its position (bit 10).
pub const SHARD_ID_SHIFT: u32 = 10;

/// Width of the shard field.
pub const SHARD_ID_BITS: u32 = 13;

/// Width of the sequence field.
pub const SEQUENCE_BITS: u32 = 10;

/// Largest shard ID that fits the shard field (8191).
pub const MAX_SHARD_ID: i64 = (1 << SHARD_ID_BITS) - 1;

/// Number of distinct sequence values (1024). Counter values this far apart
/// map to the same sequence.
pub const SEQUENCE_SPACE: u64 = 1 << SEQUENCE_BITS;

/// A 64-bit signed identifier packing a time offset, a shard and a counter
/// sequence.
///
/// - 41 bits time delta (ms since Jan 1 00:00 UTC of the current year)
/// - 13 bits shard ID
/// - 10 bits sequence (`counter_value mod 1024`)
///
/// ```text
///  Bit Index:  63              23 22            10 9              0
///              +------------------+----------------+---------------+
///  Field:      | time delta (41)  | shard ID (13)  | sequence (10) |
///              +------------------+----------------+---------------+
///              |<------- MSB -------- 64 bits -------- LSB ------->|
/// ```
///
/// # Example
///
/// ```
/// use distinctid::DistinctId;
///
/// let id = DistinctId::from_components(1_000, 2, 1_025);
/// assert_eq!(id.time_delta(), 1_000);
/// assert_eq!(id.shard_id(), 2);
/// assert_eq!(id.sequence(), 1);
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DistinctId {
    id: i64,
}

impl DistinctId {
    /// Bitmask for the 13-bit shard field once shifted down.
    pub const SHARD_ID_MASK: i64 = (1 << SHARD_ID_BITS) - 1;

    /// Bitmask for the 10-bit sequence field.
    pub const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

    /// Packs the three components into an identifier.
    ///
    /// `counter_value` is reduced modulo [`SEQUENCE_SPACE`]. A negative
    /// `time_delta` (clock behind the epoch base) is packed as-is and yields a
    /// negative identifier that sorts before every valid one.
    pub const fn from_components(time_delta: i64, shard_id: u16, counter_value: u64) -> Self {
        let time = time_delta << TIME_DELTA_SHIFT;
        let shard = (shard_id as i64 & Self::SHARD_ID_MASK) << SHARD_ID_SHIFT;
        let sequence = (counter_value % SEQUENCE_SPACE) as i64;
        Self {
            id: time | shard | sequence,
        }
    }

    /// Extracts the time delta in milliseconds.
    pub const fn time_delta(&self) -> i64 {
        self.id >> TIME_DELTA_SHIFT
    }

    /// Extracts the shard ID.
    pub const fn shard_id(&self) -> u16 {
        ((self.id >> SHARD_ID_SHIFT) & Self::SHARD_ID_MASK) as u16
    }

    /// Extracts the sequence (`counter_value mod 1024`).
    pub const fn sequence(&self) -> u16 {
        (self.id & Self::SEQUENCE_MASK) as u16
    }

    /// Reconstructs the creation time in milliseconds since the Unix epoch,
    /// given the epoch base the ID was generated against.
    pub const fn timestamp_millis(&self, epoch_base: i64) -> i64 {
        epoch_base + self.time_delta()
    }

    /// Returns the raw integer.
    pub const fn to_raw(&self) -> i64 {
        self.id
    }

    /// Wraps a raw integer.
    pub const fn from_raw(raw: i64) -> Self {
        Self { id: raw }
    }
}

impl From<DistinctId> for i64 {
    fn from(id: DistinctId) -> Self {
        id.to_raw()
    }
}

impl From<i64> for DistinctId {
    fn from(raw: i64) -> Self {
        Self::from_raw(raw)
    }
}

impl fmt::Display for DistinctId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for DistinctId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistinctId")
            .field("id", &self.id)
            .field("time_delta", &self.time_delta())
            .field("shard_id", &self.shard_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}

/// Checks that `shard_id` fits the shard field (`0..=8191`).
///
/// # Errors
///
/// Returns [`Error::InvalidShard`] for negative values or values of 8192 and
/// above.
pub fn validate_shard(shard_id: i64) -> Result<u16> {
    if shard_id < 0 || shard_id > MAX_SHARD_ID {
        return Err(Error::InvalidShard { shard_id });
    }
    Ok(shard_id as u16)
}

/// Checks that a batch count is positive.
///
/// # Errors
///
/// Returns [`Error::InvalidCount`] for zero or negative counts.
pub fn validate_count(count: i64) -> Result<u64> {
    if count <= 0 {
        return Err(Error::InvalidCount { count });
    }
    Ok(count as u64)
}

/// Returns the first counter value of a range of `count` values ending at
/// `new_total`, as reserved by a single `increment_by(key, count)`.
///
/// # Errors
///
/// Returns [`Error::BackendUnavailable`] if the backend reported a total
/// smaller than the amount it was asked to add.
pub fn range_start(new_total: u64, count: u64) -> Result<u64> {
    new_total
        .checked_sub(count)
        .map(|start| start + 1)
        .ok_or_else(|| {
            Error::backend(format!(
                "counter total {new_total} is smaller than the reserved amount {count}"
            ))
        })
}

/// Builds `count` identifiers sharing one time delta and shard, with counter
/// values `start..start + count`.
///
/// Batches larger than [`SEQUENCE_SPACE`] repeat sequences, and therefore
/// identifiers, because every member carries the same time delta.
pub fn compose_batch(time_delta: i64, shard_id: u16, start: u64, count: u64) -> Vec<DistinctId> {
    (start..start + count)
        .map(|value| DistinctId::from_components(time_delta, shard_id, value))
        .collect()
}
