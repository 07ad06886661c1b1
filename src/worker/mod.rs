//! Per-file writer worker
//!
//! Each worker is a tokio task that owns exactly one open output file and
//! drains a bounded queue of jobs for it, in order. The copy+sync of every
//! job runs on the blocking pool while a shared [`Limiter`] token is held.
//!
//! Lifecycle: `Running` until its queue is closed, `Draining` while the
//! already-queued jobs finish, then `Closed` once the gzip trailer (if any)
//! is written and the file is synced and closed. An I/O error moves the
//! worker to `Failed`: the offending job gets the error, everything still
//! queued gets [`WriteError::WriterFailed`], and the file is closed.

mod job;
mod sink;

pub use job::Body;
pub(crate) use job::WriteJob;

use crate::error::{Result, WriteError};
use crate::fs::{self, FileSystem};
use crate::limiter::Limiter;
use crate::observability::Metrics;
use flate2::Compression;
use sink::Sink;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Settings shared by every worker a factory starts
#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    pub(crate) queue_depth: usize,
    pub(crate) compression: Option<Compression>,
    pub(crate) write_buffer: usize,
}

/// Opens files and starts worker tasks for them
#[derive(Clone)]
pub(crate) struct WorkerFactory {
    fs: Arc<dyn FileSystem>,
    limiter: Limiter,
    metrics: Arc<Metrics>,
    settings: WorkerSettings,
}

impl WorkerFactory {
    pub(crate) fn new(
        fs: Arc<dyn FileSystem>,
        limiter: Limiter,
        metrics: Arc<Metrics>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            fs,
            limiter,
            metrics,
            settings,
        }
    }

    /// Create the parent directory, open `path` for append and spawn its worker
    pub(crate) async fn start(&self, path: &Path) -> Result<WorkerHandle> {
        fs::create_parent(self.fs.as_ref(), path)
            .await
            .map_err(|err| WriteError::io(path, err))?;
        let file = self
            .fs
            .open_append(path)
            .await
            .map_err(|err| WriteError::io(path, err))?;

        let (jobs_tx, jobs_rx) = mpsc::channel(self.settings.queue_depth);
        let sink = Sink::new(file, self.settings.compression, self.settings.write_buffer);
        let worker = Worker {
            path: path.to_path_buf(),
            jobs: jobs_rx,
            limiter: self.limiter.clone(),
            metrics: Arc::clone(&self.metrics),
            state: WorkerState::Running,
        };

        let task = tokio::spawn(worker.run(sink));
        self.metrics.writer_opened();
        info!(path = %path.display(), compressed = self.settings.compression.is_some(), "Writer started");

        Ok(WorkerHandle {
            path: path.to_path_buf(),
            jobs: jobs_tx,
            task,
        })
    }
}

/// Outcome of offering a job to a worker queue
#[derive(Debug)]
pub(crate) enum Handoff {
    Delivered,
    /// Queue stayed full for the whole wait
    Busy(WriteJob),
    /// Worker has stopped accepting jobs
    Dead(WriteJob),
}

/// Owner side of a running worker. Dropping the queue sender is the stop signal.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    path: PathBuf,
    jobs: mpsc::Sender<WriteJob>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) async fn offer(&self, job: WriteJob, wait: Duration) -> Handoff {
        match self.jobs.send_timeout(job, wait).await {
            Ok(()) => Handoff::Delivered,
            Err(SendTimeoutError::Timeout(job)) => Handoff::Busy(job),
            Err(SendTimeoutError::Closed(job)) => Handoff::Dead(job),
        }
    }

    /// Send without a deadline; used once the intake is closed.
    /// Hands the job back if the worker has stopped.
    pub(crate) async fn deliver(&self, job: WriteJob) -> Option<WriteJob> {
        self.jobs.send(job).await.err().map(|mpsc::error::SendError(job)| job)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting jobs. The worker keeps draining what is already queued.
    pub(crate) fn close(self) -> WorkerExit {
        let WorkerHandle { path, jobs, task } = self;
        drop(jobs);
        WorkerExit { path, task }
    }

    /// Close and wait until the file is finalized
    pub(crate) async fn shutdown(self) {
        self.close().wait().await
    }
}

/// A closed worker that may still be draining
pub(crate) struct WorkerExit {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl WorkerExit {
    pub(crate) async fn wait(self) {
        if let Err(err) = self.task.await {
            error!(path = %self.path.display(), error = %err, "Writer task did not finish cleanly");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Running,
    Draining,
    Failed,
    Closed,
}

struct Worker {
    path: PathBuf,
    jobs: mpsc::Receiver<WriteJob>,
    limiter: Limiter,
    metrics: Arc<Metrics>,
    state: WorkerState,
}

/// What is left of the sink after one job
enum Step {
    Continue(Sink),
    /// The file is unusable; the sink is gone if the copy task panicked
    Fail(Option<Sink>),
}

impl Worker {
    async fn run(mut self, mut sink: Sink) {
        let leftover = loop {
            let Some(job) = self.jobs.recv().await else {
                break Some(sink);
            };

            match self.process(sink, job).await {
                Step::Continue(next) => sink = next,
                Step::Fail(remaining) => {
                    self.transition(WorkerState::Failed);
                    self.fail_queued().await;
                    break remaining;
                }
            }

            if self.state == WorkerState::Running && self.jobs.is_closed() {
                self.transition(WorkerState::Draining);
            }
        };

        self.finish(leftover).await;
    }

    fn transition(&mut self, next: WorkerState) {
        debug!(path = %self.path.display(), from = ?self.state, to = ?next, "Writer state change");
        self.state = next;
    }

    async fn process(&mut self, mut sink: Sink, mut job: WriteJob) -> Step {
        let Some(mut body) = job.body.take() else {
            debug!(id = job.id, path = %self.path.display(), "Rejecting job without body");
            self.metrics.job_failed();
            job.fail(WriteError::BodyRequired);
            return Step::Continue(sink);
        };

        if job.is_abandoned() {
            self.skip(job);
            return Step::Continue(sink);
        }
        let permit = self.limiter.acquire().await;
        // The submitter may have given up while this job waited for a token
        if !job.try_claim() {
            drop(permit);
            self.skip(job);
            return Step::Continue(sink);
        }

        let outcome = task::spawn_blocking(move || {
            let written = sink.append(&mut body);
            (sink, written)
        })
        .await;
        drop(permit);

        match outcome {
            Ok((sink, Ok(bytes))) => {
                self.metrics.job_completed(bytes);
                debug!(id = job.id, path = %self.path.display(), bytes, "Write completed");
                job.resolve(Ok(()));
                Step::Continue(sink)
            }
            Ok((sink, Err(err))) => {
                error!(path = %self.path.display(), error = %err, "Write failed, closing writer");
                self.metrics.job_failed();
                job.fail(WriteError::io(&self.path, err));
                Step::Fail(Some(sink))
            }
            Err(join_err) => {
                error!(path = %self.path.display(), error = %join_err, "Write task aborted, closing writer");
                self.metrics.job_failed();
                job.fail(WriteError::io(&self.path, io::Error::other(join_err)));
                Step::Fail(None)
            }
        }
    }

    fn skip(&self, job: WriteJob) {
        debug!(id = job.id, path = %self.path.display(), "Dropping job its submitter gave up on");
        self.metrics.job_abandoned();
    }

    /// Reject everything still queued behind a failed write
    async fn fail_queued(&mut self) {
        self.jobs.close();
        let mut rejected = 0usize;
        while let Some(job) = self.jobs.recv().await {
            self.metrics.job_failed();
            job.fail(WriteError::WriterFailed {
                path: self.path.clone(),
            });
            rejected += 1;
        }
        if rejected > 0 {
            warn!(path = %self.path.display(), rejected, "Rejected jobs queued behind failed write");
        }
    }

    async fn finish(mut self, sink: Option<Sink>) {
        if let Some(sink) = sink {
            match task::spawn_blocking(move || sink.finish()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(path = %self.path.display(), error = %err, "Failed to finalize output file")
                }
                Err(err) => {
                    error!(path = %self.path.display(), error = %err, "Finalize task aborted")
                }
            }
        }

        self.transition(WorkerState::Closed);
        self.metrics.writer_closed();
        info!(path = %self.path.display(), "Writer closed");
    }
}
