use crate::dispatch::{ManagerConfig, RetryPolicy};
use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Queue sizes, cache size and output format
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriterConfig {
    #[serde(default = "default_intake_queue_depth")]
    pub intake_queue_depth: usize,
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    #[serde(default = "default_writer_queue_depth")]
    pub writer_queue_depth: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Gzip every output file
    #[serde(default)]
    pub compression: bool,
    #[serde(default = "default_gzip_level")]
    pub gzip_level: u32,
    #[serde(default = "default_write_buffer")]
    pub write_buffer: ByteSize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            intake_queue_depth: default_intake_queue_depth(),
            max_concurrent_transfers: default_max_concurrent_transfers(),
            writer_queue_depth: default_writer_queue_depth(),
            cache_capacity: default_cache_capacity(),
            compression: false,
            gzip_level: default_gzip_level(),
            write_buffer: default_write_buffer(),
        }
    }
}

fn default_intake_queue_depth() -> usize {
    64
}

fn default_max_concurrent_transfers() -> usize {
    6
}

fn default_writer_queue_depth() -> usize {
    2
}

fn default_cache_capacity() -> usize {
    20
}

fn default_gzip_level() -> u32 {
    1 // fastest
}

fn default_write_buffer() -> ByteSize {
    ByteSize(64 * 1024)
}

/// Handoff backoff and timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_warn_after_retries")]
    pub warn_after_retries: u32,
    #[serde(default = "default_requeue_timeout_ms")]
    pub requeue_timeout_ms: u64,
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_max_retries(),
            warn_after_retries: default_warn_after_retries(),
            requeue_timeout_ms: default_requeue_timeout_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    50
}

fn default_warn_after_retries() -> u32 {
    25
}

fn default_requeue_timeout_ms() -> u64 {
    60_000
}

fn default_submit_timeout_ms() -> u64 {
    15_000
}

impl Config {
    /// Manager parameters described by this configuration
    pub fn manager_config(&self) -> ManagerConfig {
        let writer = &self.writer;
        let retry = &self.retry;

        ManagerConfig {
            intake_queue_depth: writer.intake_queue_depth,
            max_concurrent_transfers: writer.max_concurrent_transfers,
            writer_queue_depth: writer.writer_queue_depth,
            cache_capacity: writer.cache_capacity,
            compression: writer.compression.then_some(writer.gzip_level),
            write_buffer: usize::try_from(writer.write_buffer.as_u64()).unwrap_or(usize::MAX),
            submit_timeout: Duration::from_millis(retry.submit_timeout_ms),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(retry.base_delay_ms),
                max_retries: retry.max_retries,
                warn_after: retry.warn_after_retries,
                requeue_timeout: Duration::from_millis(retry.requeue_timeout_ms),
            },
        }
    }
}
