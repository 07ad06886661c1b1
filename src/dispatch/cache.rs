use crate::error::{Result, WriteError};
use crate::observability::Metrics;
use crate::worker::{WorkerFactory, WorkerHandle};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Fixed-capacity LRU map from filename to its live writer
///
/// The cache is the only place workers are created or destroyed. Removing an
/// entry always waits for the worker to drain and close its file, so a new
/// worker for the same path can never overlap with the old one.
pub(crate) struct WriterCache {
    entries: LruCache<PathBuf, WorkerHandle>,
    factory: WorkerFactory,
    metrics: Arc<Metrics>,
}

impl WriterCache {
    pub(crate) fn new(capacity: NonZeroUsize, factory: WorkerFactory, metrics: Arc<Metrics>) -> Self {
        Self {
            entries: LruCache::new(capacity),
            factory,
            metrics,
        }
    }

    /// Existing writer for `path` (now most recently used), or a freshly started one
    pub(crate) async fn get_or_create(&mut self, path: &Path) -> Result<&WorkerHandle> {
        if !self.entries.contains(path) {
            if self.entries.len() >= self.entries.cap().get() {
                self.evict_lru().await;
            }
            let handle = self.factory.start(path).await?;
            self.entries.put(path.to_path_buf(), handle);
        }

        self.entries
            .get(path)
            .ok_or_else(|| WriteError::WriterFailed {
                path: path.to_path_buf(),
            })
    }

    async fn evict_lru(&mut self) {
        if let Some((_, victim)) = self.entries.pop_lru() {
            info!(path = %victim.path().display(), "Evicting least recently used writer");
            victim.shutdown().await;
            self.metrics.writer_evicted();
        }
    }

    /// Drop the writer for `path`, waiting for it to finish
    pub(crate) async fn remove(&mut self, path: &Path) {
        if let Some(handle) = self.entries.pop(path) {
            debug!(path = %path.display(), "Removing writer");
            handle.shutdown().await;
        }
    }

    /// Close every writer and wait for all of them to drain
    pub(crate) async fn purge(&mut self) {
        let mut exits = Vec::with_capacity(self.entries.len());
        while let Some((_, handle)) = self.entries.pop_lru() {
            exits.push(handle.close());
        }
        for exit in exits {
            exit.wait().await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, path: &Path) -> bool {
        self.entries.contains(path)
    }
}
