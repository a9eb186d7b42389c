//! System limits.
//!
//! Following TigerStyle: put limits on everything. Every log, name and
//! record has an explicit maximum size so a misconfigured pool fails at
//! creation time instead of growing without bound.

/// Maximum number of partitions in a single log.
pub const PARTITIONS_PER_LOG_MAX: u32 = 1024;

/// Maximum length in bytes of one part (namespace or local name) of a `Name`.
pub const NAME_PART_LENGTH_MAX: usize = 128;

/// Maximum size of an encoded record in bytes (4 MB).
pub const RECORD_SIZE_BYTES_MAX: u32 = 4 * 1024 * 1024;

/// Maximum number of workers in a producer or consumer pool.
pub const POOL_WORKERS_MAX: u32 = 1024;

/// Namespace used when a URN carries no explicit namespace.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Validates a partition count against the limits.
///
/// # Errors
/// Returns an error if `size` is zero or above [`PARTITIONS_PER_LOG_MAX`].
pub const fn check_partition_count(size: u32) -> crate::Result<()> {
    if size == 0 {
        return Err(crate::Error::InvalidArgument {
            name: "size",
            reason: "a log needs at least one partition",
        });
    }
    if size > PARTITIONS_PER_LOG_MAX {
        return Err(crate::Error::LimitExceeded {
            limit: "partitions_per_log",
            max: PARTITIONS_PER_LOG_MAX as u64,
            actual: size as u64,
        });
    }
    Ok(())
}
