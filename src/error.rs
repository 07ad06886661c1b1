use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors reported on a single write job's result
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("body required")]
    BodyRequired,

    #[error("too many retries ({retries}) to write to {}", .path.display())]
    TooManyRetries { path: PathBuf, retries: u32 },

    #[error("took too long to put write job in work queue, timeout {0:?}")]
    SubmitTimeout(Duration),

    #[error("dispatcher deadlocked while re-queueing write to {}", .path.display())]
    Deadlocked { path: PathBuf },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("writer for {} failed, job was not written", .path.display())]
    WriterFailed { path: PathBuf },

    #[error("multiwriter is stopped")]
    Stopped,

    #[error("write job was dropped before it completed")]
    Abandoned,
}

impl WriteError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WriteError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors caused by contention rather than the job or the filesystem
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            WriteError::TooManyRetries { .. }
                | WriteError::SubmitTimeout(_)
                | WriteError::Deadlocked { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, WriteError>;
