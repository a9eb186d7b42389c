//! Log manager over a [`LogStore`], generic over a durability journal.
//!
//! Both backends share this implementation: the in-memory backend plugs in
//! [`NullJournal`], the file backend plugs in a journal that persists every
//! mutation before it becomes visible in memory.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rill_core::limits::check_partition_count;
use rill_core::{LogLag, LogOffset, LogPartition, Name, PartitionId};
use tokio::time::Instant;
use tracing::{debug, info, Instrument};

use crate::api::{LogAppender, LogManager, LogTailer};
use crate::error::{LogError, LogResult};
use crate::record::LogRecord;
use crate::store::{LogState, LogStore, Session};

/// Persists log mutations before they are applied in memory.
///
/// A journal error aborts the operation: nothing is applied and the caller
/// receives the error.
#[async_trait]
pub trait Journal<M>: Send + Sync + 'static {
    /// Persists the creation of a log.
    async fn create_log(&self, name: &Name, size: u32) -> LogResult<()>;

    /// Persists a record at `offset`.
    async fn append(&self, partition: &LogPartition, offset: u64, message: &M) -> LogResult<()>;

    /// Persists a committed position.
    async fn commit(&self, group: &Name, partition: &LogPartition, position: u64)
        -> LogResult<()>;
}

/// Journal that persists nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJournal;

#[async_trait]
impl<M: Send + Sync + 'static> Journal<M> for NullJournal {
    async fn create_log(&self, _name: &Name, _size: u32) -> LogResult<()> {
        Ok(())
    }

    async fn append(&self, _partition: &LogPartition, _offset: u64, _message: &M) -> LogResult<()> {
        Ok(())
    }

    async fn commit(
        &self,
        _group: &Name,
        _partition: &LogPartition,
        _position: u64,
    ) -> LogResult<()> {
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Manager
// -----------------------------------------------------------------------------

/// Log manager over a shared store.
///
/// Closing the manager (or dropping it) closes every appender and tailer it
/// handed out. The store, and so every record and committed position, stays
/// available to managers opened later on it.
pub struct LocalLogManager<M, J> {
    store: Arc<LogStore<M>>,
    journal: Arc<J>,
    session: Arc<Session>,
}

impl<M, J> LocalLogManager<M, J>
where
    M: Clone + Send + Sync + 'static,
    J: Journal<M>,
{
    pub(crate) fn with_parts(store: Arc<LogStore<M>>, journal: Arc<J>) -> Self {
        Self {
            store,
            journal,
            session: Arc::new(Session::new()),
        }
    }

    fn log(&self, name: &Name) -> LogResult<Arc<LogState<M>>> {
        self.store.log(name)
    }
}

impl<M, J> std::fmt::Debug for LocalLogManager<M, J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLogManager")
            .field("closed", &self.session.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<M, J> LogManager<M> for LocalLogManager<M, J>
where
    M: Clone + Send + Sync + 'static,
    J: Journal<M>,
{
    async fn create_if_not_exists(&self, name: &Name, size: u32) -> LogResult<bool> {
        self.session.check_open()?;
        check_partition_count(size)?;

        let _creating = self.store.create_lock().lock().await;
        if self.store.contains(name) {
            return Ok(false);
        }
        self.journal.create_log(name, size).await?;
        let created = self.store.insert(LogState::new(name.clone(), size));
        if created {
            info!(log = %name, size, "Created log");
        }
        Ok(created)
    }

    fn exists(&self, name: &Name) -> bool {
        self.store.contains(name)
    }

    fn size(&self, name: &Name) -> LogResult<u32> {
        Ok(self.log(name)?.size())
    }

    fn get_appender(&self, name: &Name) -> LogResult<Arc<dyn LogAppender<M>>> {
        self.session.check_open()?;
        let log = self.log(name)?;
        Ok(Arc::new(LocalAppender {
            log,
            store: Arc::clone(&self.store),
            journal: Arc::clone(&self.journal),
            session: Arc::clone(&self.session),
        }))
    }

    fn create_tailer(
        &self,
        group: &Name,
        partitions: &[LogPartition],
    ) -> LogResult<Box<dyn LogTailer<M>>> {
        self.session.check_open()?;
        if partitions.is_empty() {
            return Err(rill_core::Error::InvalidArgument {
                name: "partitions",
                reason: "a tailer needs at least one partition",
            }
            .into());
        }

        let mut logs = Vec::with_capacity(partitions.len());
        let mut positions = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let log = self.log(partition.name())?;
            log.partition(partition.partition())?;
            positions.push(log.committed_position(group, partition.partition()));
            logs.push(log);
        }
        self.session.acquire(group, partitions)?;

        debug!(group = %group, partitions = partitions.len(), "Opened tailer");
        Ok(Box::new(LocalTailer {
            group: group.clone(),
            assignments: partitions.to_vec(),
            logs,
            positions,
            cursor: 0,
            store: Arc::clone(&self.store),
            journal: Arc::clone(&self.journal),
            session: Arc::clone(&self.session),
            closed: false,
        }))
    }

    fn list_all(&self) -> Vec<Name> {
        self.store.names()
    }

    fn list_consumer_groups(&self, name: &Name) -> LogResult<Vec<Name>> {
        Ok(self.log(name)?.groups())
    }

    fn get_lag_per_partition(&self, name: &Name, group: &Name) -> LogResult<Vec<LogLag>> {
        Ok(self.log(name)?.lags(group))
    }

    fn close(&self) {
        if self.session.is_closed() {
            return;
        }
        self.session.close();
        self.store.wake_all();
        debug!("Closed log manager");
    }

    fn closed(&self) -> bool {
        self.session.is_closed()
    }
}

impl<M, J> Drop for LocalLogManager<M, J> {
    fn drop(&mut self) {
        self.session.close();
    }
}

/// Runs a journal write and the in-memory update that follows it on their own
/// task. Once started, both complete even if the caller stops waiting.
async fn settle<T: Send + 'static>(
    mutation: impl Future<Output = LogResult<T>> + Send + 'static,
) -> LogResult<T> {
    tokio::spawn(mutation.in_current_span())
        .await
        .map_err(|err| LogError::Io {
            operation: "journal task",
            message: err.to_string(),
        })?
}

// -----------------------------------------------------------------------------
// Appender
// -----------------------------------------------------------------------------

struct LocalAppender<M, J> {
    log: Arc<LogState<M>>,
    store: Arc<LogStore<M>>,
    journal: Arc<J>,
    session: Arc<Session>,
}

#[async_trait]
impl<M, J> LogAppender<M> for LocalAppender<M, J>
where
    M: Clone + Send + Sync + 'static,
    J: Journal<M>,
{
    fn name(&self) -> &Name {
        self.log.name()
    }

    fn size(&self) -> u32 {
        self.log.size()
    }

    fn closed(&self) -> bool {
        self.session.is_closed()
    }

    async fn append(&self, partition: PartitionId, message: M) -> LogResult<LogOffset> {
        self.session.check_open()?;
        self.log.partition(partition)?;

        let log = Arc::clone(&self.log);
        let store = Arc::clone(&self.store);
        let journal = Arc::clone(&self.journal);
        settle(async move {
            let state = log.partition(partition)?;
            let _guard = state.append_lock().lock().await;
            let offset = state.len();
            let log_partition = LogPartition::new(log.name().clone(), partition);
            journal.append(&log_partition, offset, &message).await?;
            state.push(message);
            store.appended().notify_waiters();
            Ok(LogOffset::new(log_partition, offset))
        })
        .await
    }

    async fn wait_for(
        &self,
        offset: &LogOffset,
        group: &Name,
        timeout: Duration,
    ) -> LogResult<bool> {
        let log = self.store.log(offset.partition().name())?;
        let partition = offset.partition().partition();
        log.partition(partition)?;
        let deadline = Instant::now() + timeout;

        loop {
            // Register before checking so a commit between the check and the
            // wait is not missed.
            let notified = log.committed().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.session.check_open()?;
            if log.committed_position(group, partition) > offset.offset() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }
}

// -----------------------------------------------------------------------------
// Tailer
// -----------------------------------------------------------------------------

struct LocalTailer<M, J> {
    group: Name,
    assignments: Vec<LogPartition>,
    /// Log of each assignment, same order.
    logs: Vec<Arc<LogState<M>>>,
    /// Next offset to read, per assignment.
    positions: Vec<u64>,
    /// Assignment to poll first on the next read.
    cursor: usize,
    store: Arc<LogStore<M>>,
    journal: Arc<J>,
    session: Arc<Session>,
    closed: bool,
}

impl<M, J> LocalTailer<M, J>
where
    M: Clone + Send + Sync + 'static,
    J: Journal<M>,
{
    fn check_open(&self) -> LogResult<()> {
        if self.closed {
            return Err(LogError::Closed);
        }
        self.session.check_open()
    }

    fn index_of(&self, partition: &LogPartition) -> LogResult<usize> {
        self.assignments
            .iter()
            .position(|assigned| assigned == partition)
            .ok_or_else(|| LogError::NotAssigned {
                partition: partition.clone(),
            })
    }

    /// Returns the next available record, visiting assignments round-robin.
    fn poll_next(&mut self) -> Option<LogRecord<M>> {
        let count = self.assignments.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let partition = self.assignments[index].partition();
            let position = self.positions[index];
            let Ok(state) = self.logs[index].partition(partition) else {
                continue;
            };
            if let Some(message) = state.get(position) {
                self.positions[index] = position + 1;
                self.cursor = (index + 1) % count;
                let offset = LogOffset::new(self.assignments[index].clone(), position);
                return Some(LogRecord::new(offset, message));
            }
        }
        None
    }

    async fn commit_position(&self, index: usize, position: u64) -> LogResult<()> {
        self.check_open()?;
        let partition = self.assignments[index].clone();
        let log = Arc::clone(&self.logs[index]);
        let journal = Arc::clone(&self.journal);
        let group = self.group.clone();
        settle(async move {
            journal.commit(&group, &partition, position).await?;
            log.set_committed(&group, partition.partition(), position);
            debug!(group = %group, partition = %partition, position, "Committed");
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl<M, J> LogTailer<M> for LocalTailer<M, J>
where
    M: Clone + Send + Sync + 'static,
    J: Journal<M>,
{
    fn group(&self) -> &Name {
        &self.group
    }

    fn assignments(&self) -> &[LogPartition] {
        &self.assignments
    }

    fn closed(&self) -> bool {
        self.closed || self.session.is_closed()
    }

    async fn read(&mut self, timeout: Duration) -> LogResult<Option<LogRecord<M>>> {
        let deadline = Instant::now() + timeout;
        let store = Arc::clone(&self.store);

        loop {
            let notified = store.appended().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_open()?;
            if let Some(record) = self.poll_next() {
                return Ok(Some(record));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn commit(&mut self, offset: &LogOffset) -> LogResult<()> {
        let index = self.index_of(offset.partition())?;
        self.commit_position(index, offset.offset() + 1).await
    }

    async fn commit_all(&mut self) -> LogResult<()> {
        for index in 0..self.assignments.len() {
            self.commit_position(index, self.positions[index]).await?;
        }
        Ok(())
    }

    fn to_start(&mut self) {
        self.positions.iter_mut().for_each(|position| *position = 0);
    }

    fn to_end(&mut self) {
        for (index, position) in self.positions.iter_mut().enumerate() {
            *position = self.logs[index].end_offset(self.assignments[index].partition());
        }
    }

    fn to_last_committed(&mut self) {
        for (index, position) in self.positions.iter_mut().enumerate() {
            *position = self.logs[index]
                .committed_position(&self.group, self.assignments[index].partition());
        }
    }

    fn seek(&mut self, offset: &LogOffset) -> LogResult<()> {
        let index = self.index_of(offset.partition())?;
        self.positions[index] = offset.offset();
        Ok(())
    }

    async fn reset(&mut self) -> LogResult<()> {
        for index in 0..self.assignments.len() {
            self.commit_position(index, 0).await?;
        }
        self.to_start();
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.session.release(&self.group, &self.assignments);
        debug!(group = %self.group, "Closed tailer");
    }
}

impl<M, J> Drop for LocalTailer<M, J> {
    fn drop(&mut self) {
        if !self.closed {
            self.session.release(&self.group, &self.assignments);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOW: Duration = Duration::from_millis(50);

    /// Journal whose writes take a while, recording committed positions.
    #[derive(Debug, Default)]
    struct SlowJournal {
        commits: std::sync::Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Journal<u32> for SlowJournal {
        async fn create_log(&self, _name: &Name, _size: u32) -> LogResult<()> {
            Ok(())
        }

        async fn append(&self, _partition: &LogPartition, _offset: u64, _message: &u32) -> LogResult<()> {
            tokio::time::sleep(SLOW).await;
            Ok(())
        }

        async fn commit(&self, _group: &Name, _partition: &LogPartition, position: u64) -> LogResult<()> {
            tokio::time::sleep(SLOW).await;
            self.commits.lock().unwrap().push(position);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_abandoned_writes_still_apply() {
        let journal = Arc::new(SlowJournal::default());
        let manager = LocalLogManager::with_parts(Arc::new(LogStore::new()), Arc::clone(&journal));
        let log = Name::of("test", "slow").unwrap();
        let group = Name::of("test", "group").unwrap();
        manager.create_if_not_exists(&log, 1).await.unwrap();
        let appender = manager.get_appender(&log).unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            appender.append(PartitionId::new(0), 7),
        )
        .await;
        assert!(abandoned.is_err());

        let mut tailer = manager.get_tailer(&log, &group).unwrap();
        let record = tailer.read(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(record.offset().offset(), 0);
        assert_eq!(*record.message(), 7);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), tailer.commit(record.offset())).await;
        assert!(abandoned.is_err());
        assert!(appender
            .wait_for(record.offset(), &group, Duration::from_secs(5))
            .await
            .unwrap());
        assert_eq!(*journal.commits.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_concurrent_creates_agree() {
        let manager = LocalLogManager::with_parts(
            Arc::new(LogStore::<u32>::new()),
            Arc::new(SlowJournal::default()),
        );
        let log = Name::of("test", "racy").unwrap();
        let (a, b) = tokio::join!(
            manager.create_if_not_exists(&log, 2),
            manager.create_if_not_exists(&log, 3)
        );
        assert!(a.unwrap() != b.unwrap());
    }
}
