use super::cache::WriterCache;
use super::retry::RetryPolicy;
use crate::error::WriteError;
use crate::observability::Metrics;
use crate::worker::{Handoff, WriteJob};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, error, info, warn};

/// Messages on the intake queue
#[derive(Debug)]
pub(crate) enum Command {
    Write(WriteJob),
    Shutdown,
}

/// The single loop that routes jobs from the intake to per-file writers
///
/// Jobs that cannot be handed off within their wait are put back on the
/// intake. While a job for some path is parked that way, later jobs for the
/// same path are parked behind it so per-file order survives the requeue.
pub(crate) struct Dispatcher {
    intake: mpsc::Receiver<Command>,
    requeue: mpsc::Sender<Command>,
    cache: WriterCache,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
    /// Ids of parked jobs per path, oldest first
    parked: HashMap<PathBuf, VecDeque<u64>>,
    /// Parked jobs currently sitting in the intake
    in_intake: usize,
}

impl Dispatcher {
    pub(crate) fn new(
        intake: mpsc::Receiver<Command>,
        requeue: mpsc::Sender<Command>,
        cache: WriterCache,
        policy: RetryPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            intake,
            requeue,
            cache,
            policy,
            metrics,
            parked: HashMap::new(),
            in_intake: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut stopping = false;

        while let Some(command) = self.intake.recv().await {
            match command {
                Command::Write(job) => {
                    if job.parked {
                        self.in_intake -= 1;
                    }
                    self.dispatch(job).await;
                }
                Command::Shutdown => {
                    debug!(parked = self.in_intake, "Shutdown requested");
                    stopping = true;
                }
            }

            if stopping && self.in_intake == 0 {
                break;
            }
        }

        // Submissions that raced with shutdown are still delivered
        self.intake.close();
        while let Some(command) = self.intake.recv().await {
            if let Command::Write(job) = command {
                self.deliver_late(job).await;
            }
        }

        info!(writers = self.cache.len(), "Waiting for all writers to flush");
        self.cache.purge().await;
    }

    async fn dispatch(&mut self, mut job: WriteJob) {
        if job.is_abandoned() {
            self.drop_abandoned(job);
            return;
        }
        if self.is_behind_parked(&job) {
            self.park(job).await;
            return;
        }

        if self.policy.exhausted(job.retries) {
            warn!(path = %job.path.display(), retries = job.retries, "Giving up on write job");
            let error = WriteError::TooManyRetries {
                path: job.path.clone(),
                retries: job.retries,
            };
            self.fail(job, error);
            return;
        }
        if self.policy.should_warn(job.retries) {
            warn!(path = %job.path.display(), retries = job.retries, "Queue write retry");
        }

        job.retries += 1;
        let wait = self.policy.handoff_wait(job.retries);
        let path = job.path.clone();
        let id = job.id;

        let handoff = match self.cache.get_or_create(&path).await {
            Ok(writer) => writer.offer(job, wait).await,
            Err(err) => {
                self.fail(job, err);
                return;
            }
        };

        match handoff {
            Handoff::Delivered => {
                self.unpark(&path, id);
                debug!(id, path = %path.display(), "Job handed to writer");
            }
            Handoff::Busy(job) => self.park(job).await,
            Handoff::Dead(job) => {
                warn!(path = %path.display(), "Writer stopped accepting jobs, replacing it");
                self.cache.remove(&path).await;
                self.park(job).await;
            }
        }
    }

    /// True when an older job for the same path is waiting in the intake
    fn is_behind_parked(&self, job: &WriteJob) -> bool {
        self.parked
            .get(&job.path)
            .is_some_and(|queue| queue.front() != Some(&job.id))
    }

    /// Put `job` back on the intake, keeping its place among parked jobs for its path
    async fn park(&mut self, mut job: WriteJob) {
        if job.is_abandoned() {
            self.drop_abandoned(job);
            return;
        }
        if !job.parked {
            self.parked
                .entry(job.path.clone())
                .or_default()
                .push_back(job.id);
            job.parked = true;
        }

        match self
            .requeue
            .send_timeout(Command::Write(job), self.policy.requeue_timeout)
            .await
        {
            Ok(()) => {
                self.in_intake += 1;
                self.metrics.job_requeued();
            }
            Err(SendTimeoutError::Timeout(Command::Write(job))) => {
                error!(path = %job.path.display(), timeout = ?self.policy.requeue_timeout, "Multiwriter has become deadlocked");
                let error = WriteError::Deadlocked {
                    path: job.path.clone(),
                };
                self.fail(job, error);
            }
            Err(SendTimeoutError::Closed(Command::Write(job))) => {
                self.fail(job, WriteError::Stopped);
            }
            Err(_) => {}
        }
    }

    fn unpark(&mut self, path: &Path, id: u64) {
        if let Some(queue) = self.parked.get_mut(path) {
            queue.retain(|parked| *parked != id);
            if queue.is_empty() {
                self.parked.remove(path);
            }
        }
    }

    fn fail(&mut self, job: WriteJob, error: WriteError) {
        if job.parked {
            self.unpark(&job.path, job.id);
        }
        debug!(id = job.id, path = %job.path.display(), error = %error, "Write job failed");
        self.metrics.job_failed();
        job.fail(error);
    }

    /// The caller stopped waiting; the job leaves without a result
    fn drop_abandoned(&mut self, job: WriteJob) {
        if job.parked {
            self.unpark(&job.path, job.id);
        }
        debug!(id = job.id, path = %job.path.display(), "Dropping write job nobody waits for");
        self.metrics.job_abandoned();
    }

    /// Hand off a job that arrived after shutdown; nothing is requeued anymore
    async fn deliver_late(&mut self, job: WriteJob) {
        if job.is_abandoned() {
            self.drop_abandoned(job);
            return;
        }

        let path = job.path.clone();
        let rejected = match self.cache.get_or_create(&path).await {
            Ok(writer) => writer.deliver(job).await,
            Err(err) => {
                self.fail(job, err);
                return;
            }
        };

        if let Some(job) = rejected {
            self.cache.remove(&path).await;
            self.fail(job, WriteError::WriterFailed { path });
        }
    }
}
