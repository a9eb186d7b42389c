//! Rill Pattern - Producer and consumer pools over a partitioned log.
//!
//! This crate drives many producer and consumer tasks against a log from
//! `rill-log`, with batching, retry and at-least-once delivery.
//!
//! # Design
//!
//! - [`ProducerPool`]: N workers, each appending the finite sequence of a
//!   [`MessageProducer`]; the first failure fails the pool
//! - [`ConsumerPool`]: one worker per group of partitions, each reading,
//!   calling a [`MessageConsumer`], and committing on batch boundaries
//! - [`ConsumerPolicy`]: wait timeout, worker count, [`BatchPolicy`],
//!   [`RetryPolicy`], bounded or unbounded termination
//!
//! A consumer worker stops when every partition it owns has delivered a
//! [`Message::PoisonPill`], or, when bounded, once no message arrives within
//! the wait timeout. Both pools resolve to one status per worker.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use rill_core::{Name, WorkerId};
//! use rill_log::{LogManager, MemLogManager};
//! use rill_pattern::{
//!     ConsumeError, ConsumerPolicy, ConsumerPool, KeyValueProducerFactory, Message,
//!     MessageConsumer, MessageConsumerFactory, ProducerPool,
//! };
//!
//! struct Noop;
//!
//! #[async_trait::async_trait]
//! impl MessageConsumer<Bytes> for Noop {
//!     async fn accept(&mut self, _message: &Message<Bytes>) -> Result<(), ConsumeError> {
//!         Ok(())
//!     }
//! }
//!
//! struct NoopFactory;
//!
//! impl MessageConsumerFactory<Bytes> for NoopFactory {
//!     fn create_consumer(&self, _worker_id: WorkerId) -> Box<dyn MessageConsumer<Bytes>> {
//!         Box::new(Noop)
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager: Arc<dyn LogManager<Message<Bytes>>> =
//!     Arc::new(MemLogManager::<Message<Bytes>>::in_memory());
//! let log = Name::of("demo", "events")?;
//! manager.create_if_not_exists(&log, 4).await?;
//!
//! let producers = ProducerPool::new(
//!     log.clone(),
//!     Arc::clone(&manager),
//!     KeyValueProducerFactory::new(1000),
//!     8,
//! );
//! producers.start()?.await?;
//!
//! let consumers = ConsumerPool::new(
//!     log,
//!     manager,
//!     Name::of("demo", "indexer")?,
//!     NoopFactory,
//!     ConsumerPolicy::BOUNDED,
//! );
//! let statuses = consumers.start()?.await?;
//! assert_eq!(statuses.iter().map(|s| s.committed).sum::<u64>(), 8000);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod consumer;
mod error;
mod message;
mod policy;
mod pool;
mod producer;
mod status;

pub use consumer::{ConsumerPool, MessageConsumer, MessageConsumerFactory, PartitionAssignment};
pub use error::{ConsumeError, PatternError, PatternResult};
pub use message::{Message, MessageKind};
pub use policy::{
    BatchPolicy, ConsumerPolicy, ConsumerPolicyBuilder, RetryPolicy, StartOffset, TerminationMode,
};
pub use pool::PoolFuture;
pub use producer::{
    KeyMode, KeyValueProducerFactory, MessageProducer, MessageProducerFactory, ProducerPool,
};
pub use status::{ConsumerStatus, PoolSummary, ProducerStatus, WorkerOutcome};
