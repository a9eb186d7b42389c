//! Rill Log - Partitioned append-only logs with consumer groups.
//!
//! This crate provides the log boundary the Rill pools are written against,
//! and two backends for it.
//!
//! # Design
//!
//! A log is a named, fixed set of partitions. Each partition is an ordered,
//! append-only sequence of messages addressed by a `u64` offset. Consumers
//! read through a tailer bound to a consumer group; each group keeps its own
//! committed position per partition.
//!
//! - [`MemLogManager`]: everything in memory, shared through a [`MemLogStore`]
//! - [`FileLogManager`]: every append and commit framed on disk with a CRC,
//!   replayed on open
//!
//! # Operations
//!
//! - `append`: Add a message to a partition, get its offset back
//! - `read`: Fetch the next record of any assigned partition, waiting up to a
//!   timeout
//! - `commit`: Durably record a group's position
//! - `wait_for`: Block a producer until a group has committed an offset
//!
//! # `TigerStyle` Principles
//!
//! - Explicit limits on partitions and record size
//! - CRC checksums on all data
//! - No unsafe code

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod api;
mod config;
mod error;
mod file;
mod local;
mod memory;
pub mod record;
mod store;

pub use api::{partition_for_key, LogAppender, LogManager, LogTailer};
pub use config::{FileLogConfig, RECORDS_PER_PARTITION_DEFAULT};
pub use error::{LogError, LogResult};
pub use file::{FileJournal, FileLogManager};
pub use local::{Journal, LocalLogManager, NullJournal};
pub use memory::{MemLogManager, MemLogStore};
pub use record::{LogCodec, LogRecord};
