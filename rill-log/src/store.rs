//! In-memory state shared by the local log backends.
//!
//! A [`LogStore`] holds every log: the records of each partition and the
//! committed positions of each consumer group. It outlives the managers
//! opened on it, which is what makes committed positions survive a manager
//! close/reopen cycle. A [`Session`] is the per-manager part: the closed flag
//! and the registry of open tailers.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rill_core::{LogLag, LogPartition, Name, PartitionId};
use tokio::sync::Notify;

use crate::error::{LogError, LogResult};

// -----------------------------------------------------------------------------
// Log Store
// -----------------------------------------------------------------------------

/// Every log of a backend, keyed by name.
#[derive(Debug)]
pub struct LogStore<M> {
    logs: RwLock<HashMap<Name, Arc<LogState<M>>>>,
    /// Signalled after every append, on any log.
    appended: Notify,
    /// Held while a log is being created.
    creating: tokio::sync::Mutex<()>,
}

impl<M: Clone> LogStore<M> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            appended: Notify::new(),
            creating: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns a log by name.
    ///
    /// # Errors
    /// Returns `UnknownLog` if the log does not exist.
    pub fn log(&self, name: &Name) -> LogResult<Arc<LogState<M>>> {
        let logs = self.logs.read().expect("logs lock poisoned");
        logs.get(name)
            .cloned()
            .ok_or_else(|| LogError::UnknownLog { name: name.clone() })
    }

    /// Returns true if the log exists.
    #[must_use]
    pub fn contains(&self, name: &Name) -> bool {
        let logs = self.logs.read().expect("logs lock poisoned");
        logs.contains_key(name)
    }

    /// Inserts a log unless one with the same name exists.
    ///
    /// Returns `true` if the log was inserted.
    pub fn insert(&self, state: LogState<M>) -> bool {
        let mut logs = self.logs.write().expect("logs lock poisoned");
        if logs.contains_key(&state.name) {
            return false;
        }
        logs.insert(state.name.clone(), Arc::new(state));
        true
    }

    /// Returns the names of every log, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<Name> {
        let logs = self.logs.read().expect("logs lock poisoned");
        let mut names: Vec<Name> = logs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the lock serializing log creation, held across the journal
    /// write so disk and memory agree on the partition count.
    pub const fn create_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.creating
    }

    /// Returns the append notification.
    pub const fn appended(&self) -> &Notify {
        &self.appended
    }

    /// Wakes every task blocked on an append or a commit.
    pub fn wake_all(&self) {
        self.appended.notify_waiters();
        let logs = self.logs.read().expect("logs lock poisoned");
        for log in logs.values() {
            log.committed.notify_waiters();
        }
    }
}

impl<M: Clone> Default for LogStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// Log State
// -----------------------------------------------------------------------------

/// One log: its partitions and the committed positions of its groups.
#[derive(Debug)]
pub struct LogState<M> {
    name: Name,
    partitions: Vec<PartitionState<M>>,
    /// Committed position (next offset to consume) per group and partition.
    commits: Mutex<HashMap<Name, Vec<u64>>>,
    /// Signalled after every commit on this log.
    committed: Notify,
}

impl<M: Clone> LogState<M> {
    /// Creates an empty log.
    #[must_use]
    pub fn new(name: Name, size: u32) -> Self {
        Self {
            name,
            partitions: (0..size).map(|_| PartitionState::new()).collect(),
            commits: Mutex::new(HashMap::new()),
            committed: Notify::new(),
        }
    }

    /// Returns the log name.
    #[must_use]
    pub const fn name(&self) -> &Name {
        &self.name
    }

    /// Returns the number of partitions.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Bounded by PARTITIONS_PER_LOG_MAX.
    pub fn size(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Returns a partition.
    ///
    /// # Errors
    /// Returns `PartitionOutOfRange` if the partition is not part of the log.
    pub fn partition(&self, partition: PartitionId) -> LogResult<&PartitionState<M>> {
        self.partitions
            .get(partition.index())
            .ok_or_else(|| LogError::PartitionOutOfRange {
                name: self.name.clone(),
                partition: partition.get(),
                size: self.size(),
            })
    }

    /// Returns the end offset of a partition, zero if it does not exist.
    #[must_use]
    pub fn end_offset(&self, partition: PartitionId) -> u64 {
        self.partitions
            .get(partition.index())
            .map_or(0, PartitionState::len)
    }

    /// Returns the committed position of a group, zero if it never committed.
    #[must_use]
    pub fn committed_position(&self, group: &Name, partition: PartitionId) -> u64 {
        let commits = self.commits.lock().expect("commits lock poisoned");
        commits
            .get(group)
            .and_then(|positions| positions.get(partition.index()))
            .copied()
            .unwrap_or(0)
    }

    /// Records a committed position and wakes waiters.
    pub fn set_committed(&self, group: &Name, partition: PartitionId, position: u64) {
        {
            let mut commits = self.commits.lock().expect("commits lock poisoned");
            let size = self.partitions.len();
            let positions = commits
                .entry(group.clone())
                .or_insert_with(|| vec![0; size]);
            if let Some(slot) = positions.get_mut(partition.index()) {
                *slot = position;
            }
        }
        self.committed.notify_waiters();
    }

    /// Returns the commit notification.
    pub const fn committed(&self) -> &Notify {
        &self.committed
    }

    /// Returns the groups that committed on this log, sorted.
    #[must_use]
    pub fn groups(&self) -> Vec<Name> {
        let commits = self.commits.lock().expect("commits lock poisoned");
        let mut groups: Vec<Name> = commits.keys().cloned().collect();
        groups.sort();
        groups
    }

    /// Returns the lag of a group on every partition.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Bounded by PARTITIONS_PER_LOG_MAX.
    pub fn lags(&self, group: &Name) -> Vec<LogLag> {
        (0..self.partitions.len())
            .map(|index| {
                let partition = PartitionId::new(index as u32);
                LogLag::of(
                    self.committed_position(group, partition),
                    self.end_offset(partition),
                )
            })
            .collect()
    }
}

// -----------------------------------------------------------------------------
// Partition State
// -----------------------------------------------------------------------------

/// Records of one partition.
#[derive(Debug)]
pub struct PartitionState<M> {
    records: RwLock<Vec<M>>,
    /// Serializes appends so offset allocation follows journal order.
    append_lock: tokio::sync::Mutex<()>,
}

impl<M: Clone> PartitionState<M> {
    fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            append_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the end offset (next offset to be assigned).
    #[must_use]
    pub fn len(&self) -> u64 {
        let records = self.records.read().expect("records lock poisoned");
        records.len() as u64
    }

    /// Returns a copy of the record at `offset`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn get(&self, offset: u64) -> Option<M> {
        let records = self.records.read().expect("records lock poisoned");
        records.get(offset as usize).cloned()
    }

    /// Appends a record and returns its offset.
    pub fn push(&self, message: M) -> u64 {
        let mut records = self.records.write().expect("records lock poisoned");
        records.push(message);
        records.len() as u64 - 1
    }

    /// Returns the append lock.
    pub const fn append_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.append_lock
    }
}

// -----------------------------------------------------------------------------
// Session
// -----------------------------------------------------------------------------

/// Per-manager state: closed flag and tailer ownership registry.
#[derive(Debug, Default)]
pub struct Session {
    closed: AtomicBool,
    tailers: Mutex<HashSet<(Name, LogPartition)>>,
}

impl Session {
    /// Creates an open session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns `Closed` once closed.
    ///
    /// # Errors
    /// Returns `Closed` if the session has been closed.
    pub fn check_open(&self) -> LogResult<()> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    /// Marks the session closed and forgets every tailer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.tailers.lock().expect("tailers lock poisoned").clear();
    }

    /// Claims partitions for a group, all or nothing.
    ///
    /// # Errors
    /// Returns `TailerAlreadyOpen` if one of the partitions is owned.
    pub fn acquire(&self, group: &Name, partitions: &[LogPartition]) -> LogResult<()> {
        let mut tailers = self.tailers.lock().expect("tailers lock poisoned");
        for partition in partitions {
            if tailers.contains(&(group.clone(), partition.clone())) {
                return Err(LogError::TailerAlreadyOpen {
                    group: group.clone(),
                    partition: partition.clone(),
                });
            }
        }
        for partition in partitions {
            tailers.insert((group.clone(), partition.clone()));
        }
        Ok(())
    }

    /// Releases partitions claimed by a group.
    pub fn release(&self, group: &Name, partitions: &[LogPartition]) {
        let mut tailers = self.tailers.lock().expect("tailers lock poisoned");
        for partition in partitions {
            tailers.remove(&(group.clone(), partition.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> Name {
        Name::of("test", "store").unwrap()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store: LogStore<u32> = LogStore::new();
        assert!(store.insert(LogState::new(name(), 2)));
        assert!(!store.insert(LogState::new(name(), 5)));
        assert_eq!(store.log(&name()).unwrap().size(), 2);
        assert!(store.log(&Name::of("test", "other").unwrap()).is_err());
    }

    #[test]
    fn test_commits_are_per_group() {
        let log: LogState<u32> = LogState::new(name(), 2);
        let a = Name::of("test", "a").unwrap();
        let b = Name::of("test", "b").unwrap();
        log.partition(PartitionId::new(1)).unwrap().push(7);

        log.set_committed(&a, PartitionId::new(1), 1);
        assert_eq!(log.committed_position(&a, PartitionId::new(1)), 1);
        assert_eq!(log.committed_position(&b, PartitionId::new(1)), 0);
        assert_eq!(log.groups(), vec![a.clone()]);
        assert_eq!(log.lags(&b), vec![LogLag::of(0, 0), LogLag::of(0, 1)]);
        assert_eq!(log.lags(&a)[1].lag(), 0);
    }

    #[test]
    fn test_partition_out_of_range() {
        let log: LogState<u32> = LogState::new(name(), 1);
        assert!(matches!(
            log.partition(PartitionId::new(3)),
            Err(LogError::PartitionOutOfRange { partition: 3, size: 1, .. })
        ));
    }

    #[test]
    fn test_session_ownership() {
        let session = Session::new();
        let group = Name::of("test", "group").unwrap();
        let p0 = LogPartition::of(name(), 0);
        let p1 = LogPartition::of(name(), 1);

        session.acquire(&group, &[p0.clone()]).unwrap();
        assert!(session.acquire(&group, &[p1.clone(), p0.clone()]).is_err());
        // Nothing was claimed by the failed attempt.
        session.acquire(&group, &[p1.clone()]).unwrap();

        session.release(&group, &[p0.clone()]);
        session.acquire(&group, &[p0]).unwrap();

        session.close();
        assert!(session.check_open().is_err());
    }
}
