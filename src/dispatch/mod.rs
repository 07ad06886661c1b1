//! Dispatch manager
//!
//! Public entry point of the crate. A [`Manager`] owns the intake queue, the
//! writer cache and the transfer limiter:
//!
//! 1. `submit` puts a job on the bounded intake and waits for its result
//! 2. The dispatcher loop (`run`) resolves the job's writer through the LRU
//!    cache, creating it on first use and evicting the least recently used one
//!    when the cache is full
//! 3. The job is offered to the writer queue with a wait that grows with each
//!    attempt; on timeout it goes back on the intake
//! 4. The writer appends the body while holding a limiter token and resolves
//!    the job
//!
//! `stop` closes the intake and blocks until every writer has drained.
//!
//! ```no_run
//! use multiwriter::{Manager, ManagerConfig, OsFileSystem};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Arc::new(Manager::new(ManagerConfig::default(), Arc::new(OsFileSystem::new()))?);
//! let dispatcher = tokio::spawn({
//!     let manager = Arc::clone(&manager);
//!     async move { manager.run().await }
//! });
//!
//! manager.write("/tmp/out/a.log", "hello\n").await?;
//! manager.stop().await;
//! dispatcher.await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod dispatcher;
mod retry;

pub use retry::RetryPolicy;

use crate::config::ValidationError;
use crate::error::{Result, WriteError};
use crate::fs::FileSystem;
use crate::limiter::Limiter;
use crate::observability::{Metrics, MetricsSnapshot};
use crate::worker::{Body, WorkerFactory, WorkerSettings, WriteJob};
use cache::WriterCache;
use dispatcher::{Command, Dispatcher};
use flate2::Compression;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Construction parameters for a [`Manager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    pub intake_queue_depth: usize,
    pub max_concurrent_transfers: usize,
    pub writer_queue_depth: usize,
    pub cache_capacity: usize,
    /// Gzip level when compression is on, `None` for plain output
    pub compression: Option<u32>,
    /// Buffer between the (optional) compressor and the file
    pub write_buffer: usize,
    /// Overall bound on `submit`, from enqueue to result
    pub submit_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            intake_queue_depth: 64,
            max_concurrent_transfers: 6,
            writer_queue_depth: 2,
            cache_capacity: 20,
            compression: None,
            write_buffer: 64 * 1024,
            submit_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new(
        intake_queue_depth: usize,
        max_concurrent_transfers: usize,
        writer_queue_depth: usize,
        cache_capacity: usize,
        gzip: bool,
    ) -> Self {
        Self {
            intake_queue_depth,
            max_concurrent_transfers,
            writer_queue_depth,
            cache_capacity,
            compression: gzip.then(|| Compression::fast().level()),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = timeout;
        self
    }
}

/// Multiplexes appends to many files over a bounded set of writers
pub struct Manager {
    intake: Mutex<Option<mpsc::Sender<Command>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
    finished: watch::Sender<bool>,
    next_id: AtomicU64,
    submit_timeout: Duration,
    limiter: Limiter,
    metrics: Arc<Metrics>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        fs: Arc<dyn FileSystem>,
    ) -> std::result::Result<Self, ValidationError> {
        crate::config::validate_manager(&config)?;

        let cache_capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or(ValidationError::ZeroValue { field: "cache_capacity" })?;

        let metrics = Arc::new(Metrics::new());
        let limiter = Limiter::new(config.max_concurrent_transfers);
        let factory = WorkerFactory::new(
            fs,
            limiter.clone(),
            Arc::clone(&metrics),
            WorkerSettings {
                queue_depth: config.writer_queue_depth,
                compression: config.compression.map(Compression::new),
                write_buffer: config.write_buffer,
            },
        );
        let cache = WriterCache::new(cache_capacity, factory, Arc::clone(&metrics));

        let (intake_tx, intake_rx) = mpsc::channel(config.intake_queue_depth);
        let dispatcher = Dispatcher::new(
            intake_rx,
            intake_tx.clone(),
            cache,
            config.retry.clone(),
            Arc::clone(&metrics),
        );
        let (finished, _) = watch::channel(false);

        info!(
            intake_queue_depth = config.intake_queue_depth,
            max_concurrent_transfers = config.max_concurrent_transfers,
            writer_queue_depth = config.writer_queue_depth,
            cache_capacity = config.cache_capacity,
            compressed = config.compression.is_some(),
            "Created multiwriter"
        );

        Ok(Self {
            intake: Mutex::new(Some(intake_tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            finished,
            next_id: AtomicU64::new(0),
            submit_timeout: config.submit_timeout,
            limiter,
            metrics,
        })
    }

    /// Run the dispatcher loop until [`Manager::stop`] has drained everything
    pub async fn run(&self) {
        let Some(dispatcher) = lock(&self.dispatcher).take() else {
            warn!("Dispatcher already running or stopped");
            return;
        };
        dispatcher.run().await;
        self.finished.send_replace(true);
    }

    /// Append `body` to `path`, creating folders and the file if missing
    ///
    /// Waits until the bytes are written and synced, or fails once the submit
    /// timeout has elapsed. A `None` body fails with [`WriteError::BodyRequired`]
    /// without affecting other jobs for the same file.
    ///
    /// [`WriteError::SubmitTimeout`] means none of `body` reached the file.
    /// A job whose transfer already started when the deadline passed is
    /// waited for and reports its real outcome.
    pub async fn submit(&self, path: impl Into<PathBuf>, body: Option<Body>) -> Result<()> {
        let intake = lock(&self.intake).clone().ok_or(WriteError::Stopped)?;
        let deadline = Instant::now() + self.submit_timeout;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (job, mut response) = WriteJob::new(id, path.into(), body);
        let claim = job.claim();
        self.metrics.job_submitted();

        match intake
            .send_timeout(Command::Write(job), self.submit_timeout)
            .await
        {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                return Err(WriteError::SubmitTimeout(self.submit_timeout));
            }
            Err(SendTimeoutError::Closed(_)) => return Err(WriteError::Stopped),
        }
        drop(intake);

        match tokio::time::timeout_at(deadline, &mut response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WriteError::Abandoned),
            Err(_) if claim.withdraw() => {
                debug!(id, timeout = ?self.submit_timeout, "Write job withdrawn before transfer");
                Err(WriteError::SubmitTimeout(self.submit_timeout))
            }
            Err(_) => response.await.unwrap_or(Err(WriteError::Abandoned)),
        }
    }

    /// [`Manager::submit`] with a body that is always present
    pub async fn write(&self, path: impl Into<PathBuf>, body: impl Into<Body>) -> Result<()> {
        self.submit(path, Some(body.into())).await
    }

    /// Stop accepting jobs and wait until every writer has drained and closed
    ///
    /// If `run` was never started, the dispatcher is driven here so queued
    /// jobs still complete.
    pub async fn stop(&self) {
        let intake = lock(&self.intake).take();

        if let Some(intake) = intake {
            info!("Waiting for all writers to flush");
            let idle = lock(&self.dispatcher).take();
            match idle {
                Some(dispatcher) => {
                    let (sent, ()) = tokio::join!(intake.send(Command::Shutdown), dispatcher.run());
                    if sent.is_err() {
                        warn!("Intake closed before shutdown was requested");
                    }
                    self.finished.send_replace(true);
                }
                None => {
                    if intake.send(Command::Shutdown).await.is_err() {
                        warn!("Intake closed before shutdown was requested");
                    }
                }
            }
        }

        let mut finished = self.finished.subscribe();
        if finished.wait_for(|done| *done).await.is_err() {
            warn!("Dispatcher state channel closed");
        }
        info!("Multiwriter exited");
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Transfers currently holding a limiter token
    pub fn transfers_in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    /// Highest number of concurrent transfers seen so far
    pub fn peak_transfers(&self) -> usize {
        self.limiter.peak()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
