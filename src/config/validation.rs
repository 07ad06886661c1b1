use crate::dispatch::ManagerConfig;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("Gzip level {level} is out of range (0-9)")]
    InvalidGzipLevel { level: u32 },

    #[error("warn_after_retries ({warn_after}) is larger than max_retries ({max_retries})")]
    WarnAfterExceedsMax { warn_after: u32, max_retries: u32 },

    #[error("Retry backoff of up to {backoff:?} does not fit in submit_timeout ({submit_timeout:?})")]
    BackoffExceedsSubmitTimeout {
        backoff: Duration,
        submit_timeout: Duration,
    },
}

/// Validate manager parameters before any queue or cache is built
pub fn validate_manager(config: &ManagerConfig) -> Result<(), ValidationError> {
    validate_sizes(config)?;
    validate_compression(config)?;
    validate_timing(config)?;
    Ok(())
}

fn non_zero(field: &'static str, value: usize) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::ZeroValue { field });
    }
    Ok(())
}

/// Every queue, pool and buffer needs room for at least one item
fn validate_sizes(config: &ManagerConfig) -> Result<(), ValidationError> {
    non_zero("intake_queue_depth", config.intake_queue_depth)?;
    non_zero("max_concurrent_transfers", config.max_concurrent_transfers)?;
    non_zero("writer_queue_depth", config.writer_queue_depth)?;
    non_zero("cache_capacity", config.cache_capacity)?;
    non_zero("write_buffer", config.write_buffer)?;
    Ok(())
}

fn validate_compression(config: &ManagerConfig) -> Result<(), ValidationError> {
    match config.compression {
        Some(level) if level > 9 => Err(ValidationError::InvalidGzipLevel { level }),
        _ => Ok(()),
    }
}

fn validate_timing(config: &ManagerConfig) -> Result<(), ValidationError> {
    if config.submit_timeout == Duration::ZERO {
        return Err(ValidationError::ZeroValue {
            field: "submit_timeout",
        });
    }
    if config.retry.requeue_timeout == Duration::ZERO {
        return Err(ValidationError::ZeroValue {
            field: "requeue_timeout",
        });
    }
    if config.retry.warn_after > config.retry.max_retries {
        return Err(ValidationError::WarnAfterExceedsMax {
            warn_after: config.retry.warn_after,
            max_retries: config.retry.max_retries,
        });
    }

    // A job must be able to use up its retries before its caller gives up on it
    let backoff = config.retry.worst_case_backoff();
    if backoff > config.submit_timeout {
        return Err(ValidationError::BackoffExceedsSubmitTimeout {
            backoff,
            submit_timeout: config.submit_timeout,
        });
    }
    Ok(())
}
