//! File backend configuration.

use std::path::{Path, PathBuf};

/// Default record limit per partition.
pub const RECORDS_PER_PARTITION_DEFAULT: u64 = 1 << 32;

/// Configuration of a [`crate::FileLogManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLogConfig {
    /// Directory holding one sub-directory per log.
    pub data_dir: PathBuf,
    /// Sync every journal write to disk before acknowledging it.
    /// Default: false, override with `RILL_LOG_FSYNC=1`.
    pub fsync: bool,
    /// Appends beyond this many records per partition fail with
    /// `PartitionFull`.
    pub max_records_per_partition: u64,
}

impl FileLogConfig {
    /// Creates a configuration rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Enables or disables fsync on every write.
    #[must_use]
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Sets the record limit per partition.
    ///
    /// # Panics
    /// Panics if `max` is zero.
    #[must_use]
    pub fn with_max_records_per_partition(mut self, max: u64) -> Self {
        assert!(max > 0, "max_records_per_partition must be positive");
        self.max_records_per_partition = max;
        self
    }
}

impl Default for FileLogConfig {
    fn default() -> Self {
        let fsync = std::env::var("RILL_LOG_FSYNC")
            .ok()
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        Self {
            data_dir: PathBuf::from("rill-data"),
            fsync,
            max_records_per_partition: RECORDS_PER_PARTITION_DEFAULT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = FileLogConfig::new("/tmp/rill")
            .with_fsync(true)
            .with_max_records_per_partition(10);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/rill"));
        assert!(config.fsync);
        assert_eq!(config.max_records_per_partition, 10);
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn test_zero_record_limit_panics() {
        let _ = FileLogConfig::default().with_max_records_per_partition(0);
    }
}
