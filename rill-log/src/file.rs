//! File-backed log backend.
//!
//! Every mutation is framed (see [`crate::record`]) and appended to a file
//! before it becomes visible in memory. Opening a manager replays the files.
//!
//! ```text
//! <data_dir>/<namespace>/<name>/
//!     meta                    one frame: version, partition count, URN
//!     partition-00000.log     one frame per record
//!     partition-00001.log
//!     commits.log             one frame per commit, last one wins
//! ```
//!
//! A torn tail (short or corrupted last frame) is truncated on open. A frame
//! that passes its checksum but does not decode is an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rill_core::limits::check_partition_count;
use rill_core::{LogPartition, Name, PartitionId};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::config::FileLogConfig;
use crate::error::{LogError, LogResult};
use crate::local::{Journal, LocalLogManager};
use crate::record::{encode_frame, scan_frames, LogCodec};
use crate::store::{LogState, LogStore};

/// Version of the `meta` file layout.
const META_VERSION: u32 = 1;

const META_FILE: &str = "meta";
const COMMITS_FILE: &str = "commits.log";

/// File-backed log manager.
pub type FileLogManager<M> = LocalLogManager<M, FileJournal>;

impl<M> LocalLogManager<M, FileJournal>
where
    M: LogCodec + Clone + Send + Sync + 'static,
{
    /// Opens a manager on a data directory, replaying every log it holds.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read or holds corrupted
    /// data beyond a torn tail.
    pub async fn open(config: FileLogConfig) -> LogResult<Self> {
        let journal = FileJournal::new(config);
        let store = journal.recover::<M>().await?;
        info!(
            data_dir = %journal.config.data_dir.display(),
            logs = store.names().len(),
            "Opened file log manager"
        );
        Ok(Self::with_parts(Arc::new(store), Arc::new(journal)))
    }
}

/// Journal writing framed mutations under a data directory.
#[derive(Debug)]
pub struct FileJournal {
    config: FileLogConfig,
    /// Append handles, one per file.
    files: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<AppendFile>>>>,
}

impl FileJournal {
    /// Creates a journal over `config.data_dir`.
    #[must_use]
    pub fn new(config: FileLogConfig) -> Self {
        Self {
            config,
            files: Mutex::new(HashMap::new()),
        }
    }

    fn log_dir(&self, name: &Name) -> PathBuf {
        self.config
            .data_dir
            .join(name.namespace())
            .join(name.name())
    }

    fn partition_path(log_dir: &Path, partition: PartitionId) -> PathBuf {
        log_dir.join(format!("partition-{:05}.log", partition.get()))
    }

    async fn handle(&self, path: &Path) -> LogResult<Arc<tokio::sync::Mutex<AppendFile>>> {
        let existing = {
            let files = self.files.lock().expect("files lock poisoned");
            files.get(path).cloned()
        };
        if let Some(handle) = existing {
            return Ok(handle);
        }

        let file = AppendFile::open(path).await?;
        let mut files = self.files.lock().expect("files lock poisoned");
        let handle = files
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(file)));
        Ok(Arc::clone(handle))
    }

    /// Frames `payload` and appends it to `path`.
    async fn append_frame(&self, path: &Path, payload: &[u8]) -> LogResult<()> {
        let mut frame = BytesMut::new();
        encode_frame(payload, &mut frame)?;

        let handle = self.handle(path).await?;
        let mut file = handle.lock().await;
        file.append(&frame, self.config.fsync).await
    }

    /// Rebuilds the in-memory store from the data directory.
    async fn recover<M: LogCodec + Clone>(&self) -> LogResult<LogStore<M>> {
        tokio::fs::create_dir_all(&self.config.data_dir)
            .await
            .map_err(|e| LogError::io("create data dir", e))?;

        let store = LogStore::new();
        for namespace_dir in sub_dirs(&self.config.data_dir).await? {
            for log_dir in sub_dirs(&namespace_dir).await? {
                if let Some(state) = self.recover_log::<M>(&log_dir).await? {
                    store.insert(state);
                }
            }
        }
        Ok(store)
    }

    async fn recover_log<M: LogCodec + Clone>(
        &self,
        log_dir: &Path,
    ) -> LogResult<Option<LogState<M>>> {
        let meta = read_frames(&log_dir.join(META_FILE)).await?;
        let Some(meta) = meta.into_iter().next() else {
            warn!(path = %log_dir.display(), "Skipping log directory without metadata");
            return Ok(None);
        };
        let (name, size) = decode_meta(meta)?;
        let state = LogState::new(name.clone(), size);

        let mut records = 0u64;
        for index in 0..size {
            let partition = PartitionId::new(index);
            let slot = state.partition(partition)?;
            for mut payload in read_frames(&Self::partition_path(log_dir, partition)).await? {
                slot.push(M::decode(&mut payload)?);
                records += 1;
            }
        }

        let commits = read_frames(&log_dir.join(COMMITS_FILE)).await?;
        let entries = commits.len();
        let mut latest: HashMap<(Name, u32), u64> = HashMap::new();
        for payload in commits {
            let (group, partition, position) = decode_commit(payload)?;
            if partition >= size {
                return Err(LogError::corruption(format!(
                    "commit on partition {partition} of {name} with {size} partitions"
                )));
            }
            latest.insert((group, partition), position);
        }
        for ((group, partition), position) in &latest {
            state.set_committed(group, PartitionId::new(*partition), *position);
        }
        if entries > latest.len() {
            self.compact_commits(log_dir, &latest).await?;
        }

        debug!(
            log = %name,
            size,
            records,
            groups = state.groups().len(),
            "Recovered log"
        );
        Ok(Some(state))
    }

    /// Rewrites the commit file with only the latest position of each key.
    async fn compact_commits(
        &self,
        log_dir: &Path,
        latest: &HashMap<(Name, u32), u64>,
    ) -> LogResult<()> {
        let mut entries: Vec<_> = latest.iter().collect();
        entries.sort();
        let mut data = BytesMut::new();
        for ((group, partition), position) in entries {
            encode_frame(&encode_commit(group, *partition, *position), &mut data)?;
        }
        let path = log_dir.join(COMMITS_FILE);
        write_atomic(&path, &data).await?;
        debug!(path = %path.display(), entries = latest.len(), "Compacted commits");
        Ok(())
    }
}

#[async_trait]
impl<M> Journal<M> for FileJournal
where
    M: LogCodec + Send + Sync + 'static,
{
    async fn create_log(&self, name: &Name, size: u32) -> LogResult<()> {
        let log_dir = self.log_dir(name);
        tokio::fs::create_dir_all(&log_dir)
            .await
            .map_err(|e| LogError::io("create log dir", e))?;

        let mut payload = BytesMut::new();
        payload.put_u32_le(META_VERSION);
        payload.put_u32_le(size);
        name.urn().encode(&mut payload);
        let mut frame = BytesMut::new();
        encode_frame(&payload, &mut frame)?;
        write_atomic(&log_dir.join(META_FILE), &frame).await
    }

    async fn append(&self, partition: &LogPartition, offset: u64, message: &M) -> LogResult<()> {
        if offset >= self.config.max_records_per_partition {
            return Err(LogError::PartitionFull {
                partition: partition.clone(),
                max: self.config.max_records_per_partition,
            });
        }
        let mut payload = BytesMut::new();
        message.encode(&mut payload);
        let path = Self::partition_path(&self.log_dir(partition.name()), partition.partition());
        self.append_frame(&path, &payload).await
    }

    async fn commit(
        &self,
        group: &Name,
        partition: &LogPartition,
        position: u64,
    ) -> LogResult<()> {
        let payload = encode_commit(group, partition.partition().get(), position);
        let path = self.log_dir(partition.name()).join(COMMITS_FILE);
        self.append_frame(&path, &payload).await
    }
}

// -----------------------------------------------------------------------------
// Append File
// -----------------------------------------------------------------------------

/// Append handle that never leaves a partial frame behind a later one.
///
/// `len` is the size of the file made of whole frames only. A failed write is
/// truncated back to it. If that fails too, the handle refuses every later
/// write, so the torn frame stays the last one and is dropped on reopen.
#[derive(Debug)]
struct AppendFile {
    file: File,
    len: u64,
    failed: bool,
}

impl AppendFile {
    async fn open(path: &Path) -> LogResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| LogError::io("open", e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| LogError::io("stat", e))?
            .len();
        Ok(Self {
            file,
            len,
            failed: false,
        })
    }

    async fn append(&mut self, frame: &[u8], fsync: bool) -> LogResult<()> {
        if self.failed {
            return Err(LogError::Io {
                operation: "write",
                message: "file disabled after a failed rollback".to_string(),
            });
        }
        match self.write(frame, fsync).await {
            Ok(()) => {
                self.len += frame.len() as u64;
                Ok(())
            }
            Err(err) => {
                self.rollback().await;
                Err(err)
            }
        }
    }

    async fn write(&mut self, frame: &[u8], fsync: bool) -> LogResult<()> {
        self.file
            .write_all(frame)
            .await
            .map_err(|e| LogError::io("write", e))?;
        if fsync {
            self.file
                .sync_data()
                .await
                .map_err(|e| LogError::io("fsync", e))
        } else {
            self.file.flush().await.map_err(|e| LogError::io("flush", e))
        }
    }

    /// Drops whatever a failed write left past the last whole frame.
    async fn rollback(&mut self) {
        if let Err(err) = self.file.set_len(self.len).await {
            error!(len = self.len, error = %err, "Rollback of a failed write failed");
            self.failed = true;
        } else {
            warn!(len = self.len, "Rolled back a failed write");
        }
    }
}

fn decode_meta(mut payload: Bytes) -> LogResult<(Name, u32)> {
    if payload.remaining() < 8 {
        return Err(LogError::corruption("truncated log metadata"));
    }
    let version = payload.get_u32_le();
    if version != META_VERSION {
        return Err(LogError::corruption(format!(
            "unsupported log metadata version {version}"
        )));
    }
    let size = payload.get_u32_le();
    let name = Name::of_urn(&String::decode(&mut payload)?)?;
    check_partition_count(size)?;
    Ok((name, size))
}

fn encode_commit(group: &Name, partition: u32, position: u64) -> BytesMut {
    let mut payload = BytesMut::new();
    group.urn().encode(&mut payload);
    payload.put_u32_le(partition);
    payload.put_u64_le(position);
    payload
}

fn decode_commit(mut payload: Bytes) -> LogResult<(Name, u32, u64)> {
    let group = Name::of_urn(&String::decode(&mut payload)?)?;
    if payload.remaining() < 12 {
        return Err(LogError::corruption("truncated commit"));
    }
    let partition = payload.get_u32_le();
    let position = payload.get_u64_le();
    Ok((group, partition, position))
}

/// Reads the frames of a file, truncating a torn tail.
///
/// A missing file holds no frames.
async fn read_frames(path: &Path) -> LogResult<Vec<Bytes>> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => Bytes::from(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LogError::io("read", e)),
    };

    let scan = scan_frames(&data);
    if let Some(reason) = scan.stopped_by {
        warn!(
            path = %path.display(),
            valid_len = scan.valid_len,
            file_len = data.len(),
            error = %reason,
            "Truncating torn tail"
        );
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| LogError::io("open", e))?;
        file.set_len(scan.valid_len)
            .await
            .map_err(|e| LogError::io("truncate", e))?;
        file.sync_all().await.map_err(|e| LogError::io("fsync", e))?;
    }
    Ok(scan.payloads)
}

/// Writes a whole file: temp file, fsync, then rename over the target.
async fn write_atomic(path: &Path, data: &[u8]) -> LogResult<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)
        .await
        .map_err(|e| LogError::io("create", e))?;
    file.write_all(data)
        .await
        .map_err(|e| LogError::io("write", e))?;
    file.sync_all().await.map_err(|e| LogError::io("fsync", e))?;

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| LogError::io("rename", e))
}

/// Lists the sub-directories of `path`, sorted.
async fn sub_dirs(path: &Path) -> LogResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| LogError::io("read dir", e))?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| LogError::io("read dir", e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| LogError::io("stat", e))?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
