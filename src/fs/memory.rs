use super::{FileSystem, OutputFile};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Failure to inject for a given path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    CreateDir,
    Open,
    Write,
    Sync,
}

#[derive(Debug, Default)]
struct Entry {
    data: Vec<u8>,
    open_handles: usize,
    peak_open_handles: usize,
    opens: usize,
    syncs: usize,
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<PathBuf, Entry>,
    dirs: HashSet<PathBuf>,
    faults: HashMap<PathBuf, Fault>,
}

impl State {
    fn fault(&self, path: &Path, fault: Fault) -> io::Result<()> {
        if self.faults.get(path) == Some(&fault) {
            return Err(io::Error::other(format!(
                "injected {fault:?} fault on {}",
                path.display()
            )));
        }
        Ok(())
    }

    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() && parent != Path::new("/") => {
                self.dirs.contains(parent)
            }
            _ => true,
        }
    }
}

/// In-memory backend for tests and dry runs
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// read-back while the manager owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryFileSystem {
    state: Arc<Mutex<State>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Contents of `path`, if it was ever created
    pub fn read(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock()
            .files
            .get(path.as_ref())
            .map(|entry| entry.data.clone())
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.lock().files.contains_key(path.as_ref())
    }

    pub fn dir_exists(&self, path: impl AsRef<Path>) -> bool {
        self.lock().dirs.contains(path.as_ref())
    }

    /// Handles currently open on `path`
    pub fn open_handles(&self, path: impl AsRef<Path>) -> usize {
        self.lock()
            .files
            .get(path.as_ref())
            .map_or(0, |entry| entry.open_handles)
    }

    /// Highest number of simultaneously open handles ever seen on `path`
    pub fn peak_open_handles(&self, path: impl AsRef<Path>) -> usize {
        self.lock()
            .files
            .get(path.as_ref())
            .map_or(0, |entry| entry.peak_open_handles)
    }

    /// Number of times `path` has been opened
    pub fn open_count(&self, path: impl AsRef<Path>) -> usize {
        self.lock()
            .files
            .get(path.as_ref())
            .map_or(0, |entry| entry.opens)
    }

    pub fn sync_count(&self, path: impl AsRef<Path>) -> usize {
        self.lock()
            .files
            .get(path.as_ref())
            .map_or(0, |entry| entry.syncs)
    }

    /// Make every subsequent `fault` operation on `path` fail
    pub fn inject_fault(&self, path: impl Into<PathBuf>, fault: Fault) {
        self.lock().faults.insert(path.into(), fault);
    }

    pub fn clear_fault(&self, path: impl AsRef<Path>) {
        self.lock().faults.remove(path.as_ref());
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock();
        state.fault(path, Fault::CreateDir)?;

        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() || ancestor == Path::new("/") {
                break;
            }
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    async fn open_append(&self, path: &Path) -> io::Result<Box<dyn OutputFile>> {
        let mut state = self.lock();
        state.fault(path, Fault::Open)?;

        if !state.parent_exists(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent directory of {} does not exist", path.display()),
            ));
        }

        let entry = state.files.entry(path.to_path_buf()).or_default();
        entry.opens += 1;
        entry.open_handles += 1;
        entry.peak_open_handles = entry.peak_open_handles.max(entry.open_handles);

        Ok(Box::new(MemoryFile {
            state: Arc::clone(&self.state),
            path: path.to_path_buf(),
            closed: false,
        }))
    }
}

struct MemoryFile {
    state: Arc<Mutex<State>>,
    path: PathBuf,
    closed: bool,
}

impl MemoryFile {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(entry) = lock(&self.state).files.get_mut(&self.path) {
            entry.open_handles = entry.open_handles.saturating_sub(1);
        }
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        state.fault(&self.path, Fault::Write)?;
        state
            .files
            .entry(self.path.clone())
            .or_default()
            .data
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputFile for MemoryFile {
    fn sync(&mut self) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.fault(&self.path, Fault::Sync)?;
        if let Some(entry) = state.files.get_mut(&self.path) {
            entry.syncs += 1;
        }
        Ok(())
    }

    fn name(&self) -> &Path {
        &self.path
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        self.release();
    }
}
