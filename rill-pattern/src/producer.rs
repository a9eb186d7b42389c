//! Producer side: message sources and the pool appending them to a log.
//!
//! ```text
//! ProducerPool::start()
//!     └── supervisor task (JoinSet)
//!           ├── worker-0: MessageProducer ──append──> partition
//!           ├── worker-1: MessageProducer ──append──> partition
//!           └── ...
//! ```
//!
//! The first worker error aborts every other worker and fails the pool
//! future. Producers never retry.

use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rill_core::limits::POOL_WORKERS_MAX;
use rill_core::{Name, PartitionId, WorkerId};
use rill_log::{partition_for_key, LogAppender, LogManager};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, Instrument};

use crate::error::{PatternError, PatternResult};
use crate::message::Message;
use crate::pool::{PoolFuture, Shutdown, ShutdownSignal};
use crate::status::{PoolSummary, ProducerStatus};

/// A finite source of messages owned by one producer worker.
pub trait MessageProducer<V>: Send {
    /// Returns the next message, `None` once the source is exhausted.
    fn next_message(&mut self) -> Option<Message<V>>;

    /// Selects the partition of a message among `size` partitions.
    ///
    /// Keyed messages go to the partition of their key hash, others to
    /// partition 0.
    fn partition(&self, message: &Message<V>, size: u32) -> PartitionId {
        message
            .key()
            .map_or(PartitionId::new(0), |key| partition_for_key(key, size))
    }
}

/// Creates one [`MessageProducer`] per worker.
pub trait MessageProducerFactory<V>: Send + Sync {
    /// Creates the producer of a worker.
    fn create_producer(&self, worker_id: WorkerId) -> Box<dyn MessageProducer<V>>;
}

// -----------------------------------------------------------------------------
// Key/Value Producer
// -----------------------------------------------------------------------------

/// How [`KeyValueProducerFactory`] keys and routes its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMode {
    /// Keys `"{worker}-{seq:08}"`, every message of a worker on partition
    /// `worker % size`, so each worker's messages stay in order.
    Ordered,
    /// Random keys, routed by key hash.
    #[default]
    Random,
}

/// Produces `count` messages of `payload_size` random bytes per worker.
#[derive(Debug, Clone)]
pub struct KeyValueProducerFactory {
    count: u64,
    key_mode: KeyMode,
    payload_size: usize,
    seed: Option<u64>,
}

impl KeyValueProducerFactory {
    /// Creates a factory producing `count` messages per worker.
    #[must_use]
    pub const fn new(count: u64) -> Self {
        Self {
            count,
            key_mode: KeyMode::Random,
            payload_size: 16,
            seed: None,
        }
    }

    /// Sets the key mode.
    #[must_use]
    pub const fn with_key_mode(mut self, key_mode: KeyMode) -> Self {
        self.key_mode = key_mode;
        self
    }

    /// Sets the payload size in bytes.
    #[must_use]
    pub const fn with_payload_size(mut self, payload_size: usize) -> Self {
        self.payload_size = payload_size;
        self
    }

    /// Makes keys and payloads reproducible.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Returns the number of messages per worker.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }
}

impl MessageProducerFactory<Bytes> for KeyValueProducerFactory {
    fn create_producer(&self, worker_id: WorkerId) -> Box<dyn MessageProducer<Bytes>> {
        let rng = self.seed.map_or_else(StdRng::from_entropy, |seed| {
            StdRng::seed_from_u64(seed ^ u64::from(worker_id.get()))
        });
        Box::new(KeyValueProducer {
            worker_id,
            remaining: self.count,
            sequence: 0,
            key_mode: self.key_mode,
            payload_size: self.payload_size,
            rng,
        })
    }
}

struct KeyValueProducer {
    worker_id: WorkerId,
    remaining: u64,
    sequence: u64,
    key_mode: KeyMode,
    payload_size: usize,
    rng: StdRng,
}

impl MessageProducer<Bytes> for KeyValueProducer {
    fn next_message(&mut self) -> Option<Message<Bytes>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let key = match self.key_mode {
            KeyMode::Ordered => format!("{}-{:08}", self.worker_id.get(), self.sequence),
            KeyMode::Random => format!("{:016x}", self.rng.gen::<u64>()),
        };
        self.sequence += 1;

        let mut payload = vec![0u8; self.payload_size];
        self.rng.fill(&mut payload[..]);
        Some(Message::of(key, Bytes::from(payload)))
    }

    fn partition(&self, message: &Message<Bytes>, size: u32) -> PartitionId {
        match self.key_mode {
            KeyMode::Ordered => PartitionId::new(self.worker_id.get() % size.max(1)),
            KeyMode::Random => message
                .key()
                .map_or(PartitionId::new(0), |key| partition_for_key(key, size)),
        }
    }
}

// -----------------------------------------------------------------------------
// Producer Pool
// -----------------------------------------------------------------------------

/// Runs `nb_producers` workers appending to one log.
pub struct ProducerPool<V> {
    log_name: Name,
    manager: Arc<dyn LogManager<Message<V>>>,
    factory: Arc<dyn MessageProducerFactory<V>>,
    nb_producers: u32,
    shutdown: Shutdown,
}

impl<V: Send + Sync + 'static> ProducerPool<V> {
    /// Creates a pool. Nothing runs until [`ProducerPool::start`].
    pub fn new(
        log_name: Name,
        manager: Arc<dyn LogManager<Message<V>>>,
        factory: impl MessageProducerFactory<V> + 'static,
        nb_producers: u32,
    ) -> Self {
        Self {
            log_name,
            manager,
            factory: Arc::new(factory),
            nb_producers,
            shutdown: Shutdown::new(),
        }
    }

    /// Spawns the workers.
    ///
    /// # Errors
    /// Returns `InvalidPolicy` if the worker count is out of limits, `Log` if
    /// the log cannot be opened for append, `Cancelled` if the pool was
    /// closed.
    pub fn start(&self) -> PatternResult<PoolFuture<ProducerStatus>> {
        if self.nb_producers == 0 || self.nb_producers > POOL_WORKERS_MAX {
            return Err(PatternError::InvalidPolicy {
                field: "nb_producers",
                reason: "must be between 1 and POOL_WORKERS_MAX",
            });
        }
        if self.shutdown.is_triggered() {
            return Err(PatternError::Cancelled);
        }
        let appender = self.manager.get_appender(&self.log_name)?;

        let mut workers = JoinSet::new();
        for id in 0..self.nb_producers {
            let worker_id = WorkerId::new(id);
            let producer = self.factory.create_producer(worker_id);
            let span = info_span!("producer", worker_id = id, log = %self.log_name);
            workers.spawn(
                run_producer(
                    worker_id,
                    producer,
                    Arc::clone(&appender),
                    self.shutdown.subscribe(),
                )
                .instrument(span),
            );
        }
        info!(
            log = %self.log_name,
            producers = self.nb_producers,
            "Started producer pool"
        );

        let log_name = self.log_name.clone();
        Ok(PoolFuture::new(tokio::spawn(supervise(log_name, workers))))
    }

    /// Cancels every worker. The pool future resolves to `Cancelled`.
    pub fn close(&self) {
        debug!(log = %self.log_name, "Closing producer pool");
        self.shutdown.trigger();
    }
}

async fn supervise(
    log_name: Name,
    mut workers: JoinSet<PatternResult<ProducerStatus>>,
) -> PatternResult<Vec<ProducerStatus>> {
    let mut statuses = Vec::with_capacity(workers.len());
    while let Some(joined) = workers.join_next().await {
        let result = joined.map_err(PatternError::from_join).and_then(|r| r);
        match result {
            Ok(status) => statuses.push(status),
            Err(err) => {
                workers.abort_all();
                error!(log = %log_name, error = %err, "Producer pool failed");
                return Err(err);
            }
        }
    }
    statuses.sort_by_key(|status| status.worker_id);

    let summary = PoolSummary::of_producers(&statuses);
    info!(
        log = %log_name,
        producers = summary.workers,
        messages = summary.processed,
        elapsed_ms = summary.elapsed.as_millis(),
        throughput = %format!("{:.0}/s", summary.throughput()),
        "Producer pool done"
    );
    Ok(statuses)
}

async fn run_producer<V: Send + Sync + 'static>(
    worker_id: WorkerId,
    mut producer: Box<dyn MessageProducer<V>>,
    appender: Arc<dyn LogAppender<Message<V>>>,
    mut shutdown: ShutdownSignal,
) -> PatternResult<ProducerStatus> {
    let mut status = ProducerStatus::new(worker_id);
    let size = appender.size();
    debug!("Producer started");

    while let Some(message) = producer.next_message() {
        let partition = producer.partition(&message, size);
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                debug!(nb_processed = status.nb_processed, "Producer cancelled");
                return Err(PatternError::Cancelled);
            }
            appended = appender.append(partition, message) => {
                appended?;
            }
        }
        status.nb_processed += 1;
    }

    status.stopped_at = std::time::Instant::now();
    debug!(
        nb_processed = status.nb_processed,
        elapsed_ms = status.elapsed().as_millis(),
        "Producer done"
    );
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_keys_stay_on_worker_partition() {
        let factory = KeyValueProducerFactory::new(3)
            .with_key_mode(KeyMode::Ordered)
            .with_payload_size(4);
        let mut producer = factory.create_producer(WorkerId::new(5));

        let mut keys = Vec::new();
        while let Some(message) = producer.next_message() {
            assert_eq!(producer.partition(&message, 2), PartitionId::new(1));
            assert_eq!(message.value().map(Bytes::len), Some(4));
            keys.push(message.key().unwrap().to_string());
        }
        assert_eq!(keys, vec!["5-00000000", "5-00000001", "5-00000002"]);
    }

    #[test]
    fn test_random_keys_are_seeded() {
        let factory = KeyValueProducerFactory::new(2).with_seed(42);
        let mut a = factory.create_producer(WorkerId::new(0));
        let mut b = factory.create_producer(WorkerId::new(0));
        assert_eq!(a.next_message(), b.next_message());

        let message = a.next_message().unwrap();
        let expected = partition_for_key(message.key().unwrap(), 4);
        assert_eq!(a.partition(&message, 4), expected);
        assert!(a.next_message().is_none());
    }
}
