//! Positions in a partitioned log.
//!
//! - [`LogPartition`]: one partition of a named log
//! - [`LogOffset`]: one position inside a partition
//! - [`LogLag`]: distance between a consumer group's committed position and
//!   the end of a partition (or the sum over several partitions)

use std::fmt;

use crate::name::Name;
use crate::types::PartitionId;

/// A partition of a named log.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPartition {
    name: Name,
    partition: PartitionId,
}

impl LogPartition {
    /// Creates a log partition reference.
    #[must_use]
    pub const fn new(name: Name, partition: PartitionId) -> Self {
        Self { name, partition }
    }

    /// Creates a log partition reference from a raw partition index.
    #[must_use]
    pub const fn of(name: Name, partition: u32) -> Self {
        Self::new(name, PartitionId::new(partition))
    }

    /// Returns the log name.
    #[must_use]
    pub const fn name(&self) -> &Name {
        &self.name
    }

    /// Returns the partition index.
    #[must_use]
    pub const fn partition(&self) -> PartitionId {
        self.partition
    }
}

impl fmt::Debug for LogPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.partition.get())
    }
}

impl fmt::Display for LogPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.partition.get())
    }
}

/// A position in a partition.
///
/// Offsets are assigned at append time, start at zero, increase by one per
/// record and are never reused.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogOffset {
    partition: LogPartition,
    offset: u64,
}

impl LogOffset {
    /// Creates an offset.
    #[must_use]
    pub const fn new(partition: LogPartition, offset: u64) -> Self {
        Self { partition, offset }
    }

    /// Returns the partition this offset belongs to.
    #[must_use]
    pub const fn partition(&self) -> &LogPartition {
        &self.partition
    }

    /// Returns the raw offset within the partition.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the position right after this one.
    ///
    /// # Panics
    /// Panics if the offset would overflow.
    #[must_use]
    pub fn next(&self) -> Self {
        assert!(self.offset < u64::MAX, "offset overflow");
        Self {
            partition: self.partition.clone(),
            offset: self.offset + 1,
        }
    }
}

impl fmt::Debug for LogOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

impl fmt::Display for LogOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// Lag of a consumer group.
///
/// `lower` is the committed position (the next offset the group will
/// consume), `upper` the end offset. For several partitions both are sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogLag {
    lower: u64,
    upper: u64,
}

impl LogLag {
    /// Creates a lag from a committed position and an end offset.
    ///
    /// A committed position past the end is clamped to the end.
    #[must_use]
    pub const fn of(lower: u64, upper: u64) -> Self {
        let lower = if lower > upper { upper } else { lower };
        Self { lower, upper }
    }

    /// Creates the lag of a group that committed nothing on `upper` records.
    #[must_use]
    pub const fn of_pending(upper: u64) -> Self {
        Self::of(0, upper)
    }

    /// Sums per-partition lags.
    #[must_use]
    pub fn of_partitions(lags: &[Self]) -> Self {
        lags.iter().fold(Self::default(), |acc, lag| Self {
            lower: acc.lower + lag.lower,
            upper: acc.upper + lag.upper,
        })
    }

    /// Returns the committed position.
    #[must_use]
    pub const fn lower(self) -> u64 {
        self.lower
    }

    /// Returns the end offset.
    #[must_use]
    pub const fn upper(self) -> u64 {
        self.upper
    }

    /// Returns the number of records not yet committed.
    #[must_use]
    pub const fn lag(self) -> u64 {
        self.upper - self.lower
    }
}
