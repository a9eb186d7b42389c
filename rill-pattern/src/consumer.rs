//! Consumer side: message callbacks, partition assignment and the pool that
//! drives one worker per partition group.
//!
//! Each worker owns a tailer on its partitions and runs this loop:
//!
//! ```text
//!            ┌──────────── timeout (unbounded) ────────────┐
//!            v                                             │
//!   ──> WAITING ── record ──> BATCHING ── batch ready ──> COMMITTING
//!        │    │                  │   │                        │
//!        │    │                  │   └── accept failed ──> retry / FAILED
//!        │    │                  └── poison pill on every partition ──> STOPPED
//!        │    └── timeout (bounded) ──> commit pending ──> DRAINED
//!        └── log error ──> FAILED
//! ```
//!
//! Offsets are committed only on batch boundaries, so a failure or a
//! cancellation redelivers at most the uncommitted batch (at-least-once).
//! A retry rewinds every partition to the first offset the batch read on it.
//! Closing the pool interrupts reads, `accept` calls and retry delays, never
//! a commit in progress.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rill_core::limits::POOL_WORKERS_MAX;
use rill_core::{LogOffset, LogPartition, Name, PartitionId, WorkerId};
use rill_log::{LogError, LogManager, LogRecord, LogTailer};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{ConsumeError, PatternError, PatternResult};
use crate::message::Message;
use crate::policy::{ConsumerPolicy, StartOffset, TerminationMode};
use crate::pool::{PoolFuture, Shutdown, ShutdownSignal};
use crate::status::{ConsumerStatus, PoolSummary, WorkerOutcome};

/// Processes the messages of one consumer worker.
///
/// The batch hooks bracket every batch: `begin_batch` before its first
/// message, then either `commit_batch` right before its offsets are
/// committed, or `rollback_batch` after a failed `accept`.
#[async_trait]
pub trait MessageConsumer<V: Send + Sync + 'static>: Send {
    /// Called before the first message of a batch.
    async fn begin_batch(&mut self) {}

    /// Processes one message.
    ///
    /// # Errors
    /// A failure rolls back the current batch, which is then retried or
    /// abandoned depending on the consumer policy.
    async fn accept(&mut self, message: &Message<V>) -> Result<(), ConsumeError>;

    /// Called before the offsets of a batch are committed.
    async fn commit_batch(&mut self) {}

    /// Called after a failed `accept`, before the batch is redelivered.
    async fn rollback_batch(&mut self) {}
}

/// Creates one [`MessageConsumer`] per worker.
pub trait MessageConsumerFactory<V: Send + Sync + 'static>: Send + Sync {
    /// Creates the consumer of a worker.
    fn create_consumer(&self, worker_id: WorkerId) -> Box<dyn MessageConsumer<V>>;
}

// -----------------------------------------------------------------------------
// Partition Assignment
// -----------------------------------------------------------------------------

/// Which worker owns which partition: partition `p` goes to worker
/// `p % workers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    /// Owner of each partition, indexed by partition.
    owners: Vec<WorkerId>,
    workers: u32,
}

impl PartitionAssignment {
    /// Spreads `partitions` over `min(max_threads, partitions)` workers,
    /// one worker per partition when `max_threads` is 0.
    ///
    /// # Errors
    /// Returns `InvalidPolicy` if there is no partition or too many workers.
    pub fn round_robin(partitions: u32, max_threads: u16) -> PatternResult<Self> {
        if partitions == 0 {
            return Err(PatternError::InvalidPolicy {
                field: "partitions",
                reason: "a log needs at least one partition",
            });
        }
        let workers = match u32::from(max_threads) {
            0 => partitions,
            max => max.min(partitions),
        };
        if workers > POOL_WORKERS_MAX {
            return Err(PatternError::InvalidPolicy {
                field: "max_threads",
                reason: "more workers than POOL_WORKERS_MAX",
            });
        }
        let owners = (0..partitions).map(|p| WorkerId::new(p % workers)).collect();
        Ok(Self { owners, workers })
    }

    /// Returns the number of workers.
    #[must_use]
    pub const fn workers(&self) -> u32 {
        self.workers
    }

    /// Returns the owner of a partition.
    #[must_use]
    pub fn owner(&self, partition: PartitionId) -> Option<WorkerId> {
        self.owners.get(partition.index()).copied()
    }

    /// Returns the partitions owned by a worker, in order.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Bounded by PARTITIONS_PER_LOG_MAX.
    pub fn partitions_of(&self, worker_id: WorkerId) -> Vec<PartitionId> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| **owner == worker_id)
            .map(|(p, _)| PartitionId::new(p as u32))
            .collect()
    }
}

// -----------------------------------------------------------------------------
// Consumer Pool
// -----------------------------------------------------------------------------

/// Runs one worker per partition group of a log for a consumer group.
pub struct ConsumerPool<V: Send + Sync + 'static> {
    log_name: Name,
    manager: Arc<dyn LogManager<Message<V>>>,
    group: Name,
    factory: Arc<dyn MessageConsumerFactory<V>>,
    policy: ConsumerPolicy,
    shutdown: Shutdown,
}

impl<V: Clone + Send + Sync + 'static> ConsumerPool<V> {
    /// Creates a pool. Nothing runs until [`ConsumerPool::start`].
    pub fn new(
        log_name: Name,
        manager: Arc<dyn LogManager<Message<V>>>,
        group: Name,
        factory: impl MessageConsumerFactory<V> + 'static,
        policy: ConsumerPolicy,
    ) -> Self {
        Self {
            log_name,
            manager,
            group,
            factory: Arc::new(factory),
            policy,
            shutdown: Shutdown::new(),
        }
    }

    /// Returns the consumer group.
    #[must_use]
    pub const fn group(&self) -> &Name {
        &self.group
    }

    /// Assigns partitions, opens one tailer per worker and spawns the
    /// workers.
    ///
    /// # Errors
    /// Returns `Log` if the log is unknown or a partition is already tailed
    /// by this group, `Cancelled` if the pool was closed.
    pub fn start(&self) -> PatternResult<PoolFuture<ConsumerStatus>> {
        if self.shutdown.is_triggered() {
            return Err(PatternError::Cancelled);
        }
        let size = self.manager.size(&self.log_name)?;
        let assignment = PartitionAssignment::round_robin(size, self.policy.max_threads())?;

        // Open every tailer before spawning so ownership conflicts fail start.
        let mut workers = Vec::with_capacity(assignment.workers() as usize);
        for id in 0..assignment.workers() {
            let worker_id = WorkerId::new(id);
            let partitions: Vec<LogPartition> = assignment
                .partitions_of(worker_id)
                .into_iter()
                .map(|p| LogPartition::new(self.log_name.clone(), p))
                .collect();
            let mut tailer = self.manager.create_tailer(&self.group, &partitions)?;
            match self.policy.start_offset() {
                StartOffset::Begin => tailer.to_start(),
                StartOffset::End => tailer.to_end(),
                StartOffset::LastCommitted => {}
            }
            debug!(
                worker_id = id,
                group = %self.group,
                partitions = ?partitions.iter().map(|p| p.partition().get()).collect::<Vec<_>>(),
                "Assigned partitions"
            );
            workers.push(ConsumerWorker {
                worker_id,
                tailer,
                consumer: self.factory.create_consumer(worker_id),
                policy: self.policy,
                status: ConsumerStatus::new(worker_id),
                batch: Batch::default(),
                drained: HashSet::new(),
                retries: 0,
                shutdown: self.shutdown.subscribe(),
            });
        }

        let mut tasks = JoinSet::new();
        for worker in workers {
            let span = info_span!(
                "consumer",
                worker_id = worker.worker_id.get(),
                group = %self.group
            );
            tasks.spawn(worker.run().instrument(span));
        }
        info!(
            log = %self.log_name,
            group = %self.group,
            workers = assignment.workers(),
            partitions = size,
            "Started consumer pool"
        );

        let log_name = self.log_name.clone();
        let group = self.group.clone();
        Ok(PoolFuture::new(tokio::spawn(supervise(log_name, group, tasks))))
    }

    /// Cancels every worker. In-flight batches are not committed and the
    /// interrupted workers report `fail`.
    pub fn close(&self) {
        debug!(log = %self.log_name, group = %self.group, "Closing consumer pool");
        self.shutdown.trigger();
    }
}

async fn supervise(
    log_name: Name,
    group: Name,
    mut tasks: JoinSet<ConsumerStatus>,
) -> PatternResult<Vec<ConsumerStatus>> {
    let mut statuses = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(status) => statuses.push(status),
            Err(err) => {
                tasks.abort_all();
                let err = PatternError::from_join(err);
                error!(log = %log_name, group = %group, error = %err, "Consumer pool failed");
                return Err(err);
            }
        }
    }
    statuses.sort_by_key(|status| status.worker_id);

    let summary = PoolSummary::of_consumers(&statuses);
    info!(
        log = %log_name,
        group = %group,
        consumers = summary.workers,
        committed = summary.processed,
        accepted = summary.accepted,
        failures = summary.failures,
        elapsed_ms = summary.elapsed.as_millis(),
        throughput = %format!("{:.0}/s", summary.throughput()),
        "Consumer pool done"
    );
    Ok(statuses)
}

// -----------------------------------------------------------------------------
// Worker
// -----------------------------------------------------------------------------

/// Uncommitted work of a consumer worker.
#[derive(Debug, Default)]
struct Batch {
    /// Messages accepted since the last commit.
    size: u64,
    /// When the first message was accepted.
    started_at: Option<Instant>,
    /// Highest offset to commit, per partition.
    cursor: BTreeMap<LogPartition, LogOffset>,
    /// First offset read since the last commit, per partition.
    start: BTreeMap<LogPartition, LogOffset>,
}

impl Batch {
    fn mark_read(&mut self, offset: &LogOffset) {
        self.start
            .entry(offset.partition().clone())
            .or_insert_with(|| offset.clone());
    }

    fn track(&mut self, offset: LogOffset) {
        self.cursor.insert(offset.partition().clone(), offset);
    }

    const fn has_messages(&self) -> bool {
        self.size > 0
    }
}

struct ConsumerWorker<V: Send + Sync + 'static> {
    worker_id: WorkerId,
    tailer: Box<dyn LogTailer<Message<V>>>,
    consumer: Box<dyn MessageConsumer<V>>,
    policy: ConsumerPolicy,
    status: ConsumerStatus,
    batch: Batch,
    /// Partitions that delivered a poison pill.
    drained: HashSet<LogPartition>,
    /// Redeliveries of the current batch.
    retries: u32,
    shutdown: ShutdownSignal,
}

impl<V: Clone + Send + Sync + 'static> ConsumerWorker<V> {
    async fn run(mut self) -> ConsumerStatus {
        info!(partitions = self.tailer.assignments().len(), "Consumer started");

        let outcome = self.consume().await;

        self.tailer.close();
        self.status.finish(outcome);
        info!(
            outcome = outcome.as_str(),
            accepted = self.status.accepted,
            committed = self.status.committed,
            batch_commits = self.status.batch_commits,
            batch_failures = self.status.batch_failures,
            "Consumer finished"
        );
        self.status
    }

    async fn consume(&mut self) -> WorkerOutcome {
        loop {
            let (timeout, flush_bound) = self.read_timeout();
            let read = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return WorkerOutcome::Cancelled,
                read = self.tailer.read(timeout) => read,
            };
            let record = match read {
                Ok(record) => record,
                Err(err) => return Self::log_failure(&err, "read"),
            };

            let outcome = match record {
                Some(record) => self.handle(record).await,
                None => self.on_timeout(flush_bound).await,
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    /// Returns the read timeout and whether it was shortened by the batch
    /// flush interval.
    fn read_timeout(&self) -> (Duration, bool) {
        let wait = self.policy.wait_message_timeout();
        let Some(started_at) = self.batch.started_at else {
            return (wait, false);
        };
        let flush_in = self
            .policy
            .batch_policy()
            .flush_interval()
            .saturating_sub(started_at.elapsed());
        if flush_in < wait {
            (flush_in, true)
        } else {
            (wait, false)
        }
    }

    async fn on_timeout(&mut self, flush_bound: bool) -> Option<WorkerOutcome> {
        if flush_bound {
            debug!(size = self.batch.size, "Batch flush interval elapsed");
            return self.commit().await.err();
        }
        match self.policy.termination_mode() {
            TerminationMode::Unbounded => None,
            TerminationMode::Bounded => {
                if let Err(outcome) = self.commit().await {
                    return Some(outcome);
                }
                debug!("No message within wait timeout");
                Some(WorkerOutcome::Drained)
            }
        }
    }

    async fn handle(&mut self, record: LogRecord<Message<V>>) -> Option<WorkerOutcome> {
        let (offset, message) = record.into_parts();
        if self.drained.contains(offset.partition()) {
            debug!(offset = %offset, "Skipping record after poison pill");
            return None;
        }

        match message {
            Message::PoisonPill => {
                debug!(offset = %offset, "Received poison pill");
                self.drained.insert(offset.partition().clone());
                self.batch.track(offset);
                if let Err(outcome) = self.commit().await {
                    return Some(outcome);
                }
                (self.drained.len() == self.tailer.assignments().len())
                    .then_some(WorkerOutcome::Stopped)
            }
            Message::Data { .. } | Message::ForceBatch { .. } => {
                if !self.batch.has_messages() {
                    self.consumer.begin_batch().await;
                    self.batch.started_at = Some(Instant::now());
                }
                self.batch.mark_read(&offset);
                let accepted = tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => return Some(WorkerOutcome::Cancelled),
                    accepted = self.consumer.accept(&message) => accepted,
                };
                if let Err(err) = accepted {
                    return self.on_failure(&offset, &err).await;
                }
                self.status.accepted += 1;
                self.batch.size += 1;
                self.batch.track(offset);

                let capacity = u64::from(self.policy.batch_policy().capacity());
                let force = matches!(message, Message::ForceBatch { .. });
                if force || self.batch.size >= capacity || self.flush_due() {
                    return self.commit().await.err();
                }
                None
            }
        }
    }

    fn flush_due(&self) -> bool {
        self.batch.started_at.is_some_and(|started_at| {
            started_at.elapsed() >= self.policy.batch_policy().flush_interval()
        })
    }

    /// Commits the batch cursor. Returns the terminal outcome on log failure.
    async fn commit(&mut self) -> Result<(), WorkerOutcome> {
        if self.batch.cursor.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        if batch.has_messages() {
            self.consumer.commit_batch().await;
        }
        for offset in batch.cursor.values() {
            if let Err(err) = self.tailer.commit(offset).await {
                return Err(Self::log_failure(&err, "commit"));
            }
        }

        self.retries = 0;
        if batch.has_messages() {
            self.status.committed += batch.size;
            self.status.batch_commits += 1;
        }
        debug!(
            size = batch.size,
            partitions = batch.cursor.len(),
            committed = self.status.committed,
            "Committed batch"
        );
        Ok(())
    }

    /// Rolls back the batch, then rewinds to its first offsets for a retry or
    /// gives up.
    async fn on_failure(&mut self, offset: &LogOffset, err: &ConsumeError) -> Option<WorkerOutcome> {
        self.consumer.rollback_batch().await;
        self.status.batch_failures += 1;
        let dropped = std::mem::take(&mut self.batch);

        if !self.policy.continue_on_failure() {
            error!(offset = %offset, error = %err, "Consumer failed, stopping");
            return Some(WorkerOutcome::Failed);
        }
        let retry_policy = self.policy.retry_policy();
        if self.retries >= retry_policy.max_retries() {
            error!(
                offset = %offset,
                error = %err,
                retries = self.retries,
                "Consumer failed, retries exhausted"
            );
            return Some(WorkerOutcome::Failed);
        }

        self.retries += 1;
        let delay = retry_policy.delay_for(self.retries);
        warn!(
            offset = %offset,
            error = %err,
            retry = self.retries,
            max_retries = retry_policy.max_retries(),
            redelivered = dropped.size,
            delay_ms = delay.as_millis(),
            "Consumer failed, retrying batch"
        );
        for start in dropped.start.values() {
            if let Err(err) = self.tailer.seek(start) {
                return Some(Self::log_failure(&err, "seek"));
            }
        }
        if !delay.is_zero() {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Some(WorkerOutcome::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
        None
    }

    fn log_failure(err: &LogError, operation: &'static str) -> WorkerOutcome {
        error!(operation, error = %err, "Consumer failed on log");
        WorkerOutcome::Failed
    }
}
