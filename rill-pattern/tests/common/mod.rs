//! Shared fixtures for the pool integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rill_core::{Name, PartitionId, WorkerId};
use rill_log::{LogManager, MemLogManager};
use rill_pattern::{
    ConsumeError, ConsumerPolicy, ConsumerStatus, KeyValueProducerFactory, Message,
    MessageConsumer, MessageConsumerFactory, ProducerPool, ProducerStatus, TerminationMode,
};
use tracing_subscriber::EnvFilter;

/// Wait timeout of the bounded test policies.
pub const WAIT: Duration = Duration::from_millis(300);

pub type Manager = Arc<dyn LogManager<Message<Bytes>>>;

/// Installs a test subscriber once, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn name(n: &str) -> Name {
    Name::of("test", n).unwrap()
}

pub fn memory() -> Manager {
    Arc::new(MemLogManager::<Message<Bytes>>::in_memory())
}

/// Bounded policy with a short wait timeout.
pub fn bounded() -> ConsumerPolicy {
    ConsumerPolicy::builder()
        .wait_message_timeout(WAIT)
        .build()
        .unwrap()
}

/// Unbounded policy with a short wait timeout.
pub fn unbounded() -> ConsumerPolicy {
    ConsumerPolicy::builder()
        .wait_message_timeout(WAIT)
        .termination_mode(TerminationMode::Unbounded)
        .build()
        .unwrap()
}

/// Runs `producers` workers of `count` random messages each to completion.
pub async fn produce(manager: &Manager, log: &Name, producers: u32, count: u64) -> Vec<ProducerStatus> {
    ProducerPool::new(
        log.clone(),
        Arc::clone(manager),
        KeyValueProducerFactory::new(count),
        producers,
    )
    .start()
    .unwrap()
    .await
    .unwrap()
}

/// Appends one poison pill to every partition.
pub async fn send_pills(manager: &Manager, log: &Name) {
    let appender = manager.get_appender(log).unwrap();
    for p in 0..appender.size() {
        appender
            .append(PartitionId::new(p), Message::POISON_PILL)
            .await
            .unwrap();
    }
}

pub fn committed(statuses: &[ConsumerStatus]) -> u64 {
    statuses.iter().map(|s| s.committed).sum()
}

pub fn accepted(statuses: &[ConsumerStatus]) -> u64 {
    statuses.iter().map(|s| s.accepted).sum()
}

// -----------------------------------------------------------------------------
// Consumers
// -----------------------------------------------------------------------------

type AcceptFn = dyn Fn(&Message<Bytes>) -> Result<(), ConsumeError> + Send + Sync;

/// Builds every worker's consumer from one shared closure.
pub struct FnConsumerFactory {
    accept: Arc<AcceptFn>,
}

impl MessageConsumerFactory<Bytes> for FnConsumerFactory {
    fn create_consumer(&self, _worker_id: WorkerId) -> Box<dyn MessageConsumer<Bytes>> {
        Box::new(FnConsumer {
            accept: Arc::clone(&self.accept),
        })
    }
}

struct FnConsumer {
    accept: Arc<AcceptFn>,
}

#[async_trait]
impl MessageConsumer<Bytes> for FnConsumer {
    async fn accept(&mut self, message: &Message<Bytes>) -> Result<(), ConsumeError> {
        (self.accept)(message)
    }
}

pub fn consumer_fn(
    accept: impl Fn(&Message<Bytes>) -> Result<(), ConsumeError> + Send + Sync + 'static,
) -> FnConsumerFactory {
    FnConsumerFactory {
        accept: Arc::new(accept),
    }
}

pub fn accept_all() -> FnConsumerFactory {
    consumer_fn(|_| Ok(()))
}

pub fn always_fail() -> FnConsumerFactory {
    consumer_fn(|_| Err(ConsumeError::new("always fails")))
}
