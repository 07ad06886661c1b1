use super::{FileSystem, OutputFile};
use async_trait::async_trait;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs::{DirBuilder, OpenOptions};

/// Local disk backend
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl OsFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for OsFileSystem {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(path).await
    }

    async fn open_append(&self, path: &Path) -> io::Result<Box<dyn OutputFile>> {
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        options.mode(0o600);

        let file = options.open(path).await?.into_std().await;
        tracing::debug!(path = %path.display(), "Opened output file");

        Ok(Box::new(OsFile {
            path: path.to_path_buf(),
            file,
        }))
    }
}

struct OsFile {
    path: PathBuf,
    file: File,
}

impl Write for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl OutputFile for OsFile {
    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn name(&self) -> &Path {
        &self.path
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        // std::fs::File has no fallible close; a final sync surfaces deferred write errors
        self.file.sync_all()
    }
}
