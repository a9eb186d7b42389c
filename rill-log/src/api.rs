//! The log boundary: manager, appender and tailer.
//!
//! Everything above this module (the producer and consumer pools) only talks
//! to a log through these three traits, so a pool can be driven by the
//! in-memory backend in tests and by the file backend in production.
//!
//! ```text
//! LogManager ──create_if_not_exists──> log (N partitions)
//!     │
//!     ├── get_appender ──> LogAppender ── append(partition, message) ──> LogOffset
//!     │                                └─ wait_for(offset, group, timeout)
//!     │
//!     └── create_tailer ─> LogTailer ──── read(timeout) ──> LogRecord
//!                                     └── commit(offset) (per group, durable)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rill_core::{LogLag, LogOffset, LogPartition, Name, PartitionId};

use crate::error::LogResult;
use crate::record::LogRecord;

/// Entry point of a log backend.
///
/// A manager owns the appenders and tailers it hands out: closing it closes
/// them all. Committed consumer positions outlive the manager.
#[async_trait]
pub trait LogManager<M: Send + 'static>: Send + Sync {
    /// Creates a log with `size` partitions unless it already exists.
    ///
    /// Returns `true` if the log was created. The partition count of an
    /// existing log is never changed.
    ///
    /// # Errors
    /// Returns an error if `size` is out of limits or the backend fails.
    async fn create_if_not_exists(&self, name: &Name, size: u32) -> LogResult<bool>;

    /// Returns true if the log exists.
    fn exists(&self, name: &Name) -> bool;

    /// Returns the number of partitions of a log.
    ///
    /// # Errors
    /// Returns `UnknownLog` if the log does not exist.
    fn size(&self, name: &Name) -> LogResult<u32>;

    /// Returns an appender on a log.
    ///
    /// # Errors
    /// Returns `UnknownLog` or `Closed`.
    fn get_appender(&self, name: &Name) -> LogResult<Arc<dyn LogAppender<M>>>;

    /// Creates a tailer for a consumer group on the given partitions.
    ///
    /// The tailer starts at the last committed position of the group. At
    /// most one open tailer per `(group, partition)` is allowed.
    ///
    /// # Errors
    /// Returns `UnknownLog`, `PartitionOutOfRange`, `TailerAlreadyOpen` or
    /// `Closed`.
    fn create_tailer(
        &self,
        group: &Name,
        partitions: &[LogPartition],
    ) -> LogResult<Box<dyn LogTailer<M>>>;

    /// Creates a tailer for a consumer group on every partition of a log.
    ///
    /// # Errors
    /// Same as [`LogManager::create_tailer`].
    fn get_tailer(&self, name: &Name, group: &Name) -> LogResult<Box<dyn LogTailer<M>>> {
        let size = self.size(name)?;
        let partitions: Vec<LogPartition> = (0..size)
            .map(|p| LogPartition::of(name.clone(), p))
            .collect();
        self.create_tailer(group, &partitions)
    }

    /// Lists every log known to the manager.
    fn list_all(&self) -> Vec<Name>;

    /// Lists the consumer groups that committed at least once on a log.
    ///
    /// # Errors
    /// Returns `UnknownLog` if the log does not exist.
    fn list_consumer_groups(&self, name: &Name) -> LogResult<Vec<Name>>;

    /// Returns the lag of a group on every partition of a log.
    ///
    /// # Errors
    /// Returns `UnknownLog` if the log does not exist.
    fn get_lag_per_partition(&self, name: &Name, group: &Name) -> LogResult<Vec<LogLag>>;

    /// Returns the lag of a group summed over all partitions of a log.
    ///
    /// # Errors
    /// Returns `UnknownLog` if the log does not exist.
    fn get_lag(&self, name: &Name, group: &Name) -> LogResult<LogLag> {
        Ok(LogLag::of_partitions(
            &self.get_lag_per_partition(name, group)?,
        ))
    }

    /// Closes the manager and every appender and tailer it created.
    fn close(&self);

    /// Returns true once the manager has been closed.
    fn closed(&self) -> bool;
}

/// Writes messages to the partitions of one log.
#[async_trait]
pub trait LogAppender<M: Send + 'static>: Send + Sync {
    /// Returns the log name.
    fn name(&self) -> &Name;

    /// Returns the number of partitions.
    fn size(&self) -> u32;

    /// Returns true once the owning manager has been closed.
    fn closed(&self) -> bool;

    /// Appends a message to a partition and returns its offset.
    ///
    /// # Errors
    /// Returns `PartitionOutOfRange`, `Closed`, or a backend error.
    async fn append(&self, partition: PartitionId, message: M) -> LogResult<LogOffset>;

    /// Appends a message to the partition selected by a hash of `key`.
    ///
    /// # Errors
    /// Same as [`LogAppender::append`].
    async fn append_keyed(&self, key: &str, message: M) -> LogResult<LogOffset> {
        let partition = partition_for_key(key, self.size());
        self.append(partition, message).await
    }

    /// Waits until `group` has committed `offset`.
    ///
    /// Returns `false` if the timeout elapses first. A zero timeout checks
    /// once without waiting.
    ///
    /// # Errors
    /// Returns `Closed` if the manager is closed while waiting.
    async fn wait_for(&self, offset: &LogOffset, group: &Name, timeout: Duration)
        -> LogResult<bool>;
}

/// Reads the partitions assigned to one consumer of a group.
///
/// A tailer keeps an in-memory position per partition and a durable committed
/// position per `(group, partition)` in the backend.
#[async_trait]
pub trait LogTailer<M: Send + 'static>: Send {
    /// Returns the consumer group.
    fn group(&self) -> &Name;

    /// Returns the assigned partitions.
    fn assignments(&self) -> &[LogPartition];

    /// Returns true if the tailer or its manager has been closed.
    fn closed(&self) -> bool;

    /// Reads the next record of any assigned partition.
    ///
    /// Partitions are visited round-robin. Returns `None` if nothing arrives
    /// before the timeout.
    ///
    /// # Errors
    /// Returns `Closed` if the tailer or its manager is closed.
    async fn read(&mut self, timeout: Duration) -> LogResult<Option<LogRecord<M>>>;

    /// Commits a position: the record at `offset` and everything before it on
    /// that partition are processed.
    ///
    /// # Errors
    /// Returns `NotAssigned`, `Closed`, or a backend error.
    async fn commit(&mut self, offset: &LogOffset) -> LogResult<()>;

    /// Commits the current read position of every assigned partition.
    ///
    /// # Errors
    /// Returns `Closed` or a backend error.
    async fn commit_all(&mut self) -> LogResult<()>;

    /// Moves every position to the beginning of its partition.
    fn to_start(&mut self);

    /// Moves every position to the end of its partition.
    fn to_end(&mut self);

    /// Moves every position back to the last committed one.
    fn to_last_committed(&mut self);

    /// Moves the position of one partition.
    ///
    /// # Errors
    /// Returns `NotAssigned` if the partition is not assigned to this tailer.
    fn seek(&mut self, offset: &LogOffset) -> LogResult<()>;

    /// Resets the committed positions to the beginning and moves there.
    ///
    /// # Errors
    /// Returns `Closed` or a backend error.
    async fn reset(&mut self) -> LogResult<()>;

    /// Closes the tailer, releasing its partitions for the group.
    fn close(&mut self);
}

/// Selects a partition from a key with a hash that is stable across
/// processes and releases.
#[must_use]
pub fn partition_for_key(key: &str, size: u32) -> PartitionId {
    if size == 0 {
        return PartitionId::new(0);
    }
    let hash = xxhash_rust::xxh3::xxh3_64(key.as_bytes());
    #[allow(clippy::cast_possible_truncation)] // Modulo a u32.
    PartitionId::new((hash % u64::from(size)) as u32)
}
