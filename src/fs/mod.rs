//! Filesystem capability injected into the manager
//!
//! The writer core never touches `std::fs` directly. Everything goes through
//! [`FileSystem`], so the on-disk backend can be swapped for
//! [`MemoryFileSystem`] in tests without any other change.

mod memory;
mod os;

use async_trait::async_trait;
use std::io::{self, Write};
use std::path::Path;

pub use memory::{Fault, MemoryFileSystem};
pub use os::OsFileSystem;

/// Directory creation and append-mode opening of output files
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Create `path` and all missing parents
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Open `path` for appending, creating it if missing
    async fn open_append(&self, path: &Path) -> io::Result<Box<dyn OutputFile>>;
}

/// An open output resource, exclusively owned by one writer worker
pub trait OutputFile: Write + Send {
    /// Flush OS buffers to durable storage
    fn sync(&mut self) -> io::Result<()>;

    fn name(&self) -> &Path;

    /// Release the resource; errors here mean data may not have been persisted
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Create the parent directory of `path` if it has one
pub async fn create_parent(fs: &dyn FileSystem, path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs.create_dir_all(parent).await,
        _ => Ok(()),
    }
}
