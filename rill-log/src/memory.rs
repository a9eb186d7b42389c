//! In-memory log backend.
//!
//! Records and committed positions live in a [`MemLogStore`]. Managers opened
//! on the same store see the same logs, so a consumer group resumes where it
//! left off after its manager is closed and a new one is opened.

use std::sync::Arc;

use crate::local::{LocalLogManager, NullJournal};
use crate::store::LogStore;

/// In-memory log manager.
pub type MemLogManager<M> = LocalLogManager<M, NullJournal>;

/// Shared in-memory storage for [`MemLogManager`]s.
///
/// Clones share the same logs.
#[derive(Debug)]
pub struct MemLogStore<M> {
    inner: Arc<LogStore<M>>,
}

impl<M: Clone> MemLogStore<M> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LogStore::new()),
        }
    }
}

impl<M: Clone> Default for MemLogStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for MemLogStore<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Clone + Send + Sync + 'static> LocalLogManager<M, NullJournal> {
    /// Opens a manager on a shared store.
    #[must_use]
    pub fn open(store: &MemLogStore<M>) -> Self {
        Self::with_parts(Arc::clone(&store.inner), Arc::new(NullJournal))
    }

    /// Opens a manager on a fresh private store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::open(&MemLogStore::new())
    }
}
