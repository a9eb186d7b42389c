//! Rill Core - Value types shared by the Rill log and pattern crates.
//!
//! This crate provides the identifiers every other Rill crate speaks in. It
//! does NOT provide any storage: logs, tailers and appenders live in
//! `rill-log`, pools and policies in `rill-pattern`.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: a `PartitionId` can't be mixed up with a `WorkerId`
//! - **Explicit limits**: names, partition counts and records are bounded
//! - **Explicit types**: `u32` partitions, `u64` offsets, no `usize` on the wire
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
pub mod limits;
mod name;
mod offset;
mod types;

pub use error::{Error, Result};
pub use name::Name;
pub use offset::{LogLag, LogOffset, LogPartition};
pub use types::{PartitionId, WorkerId};
