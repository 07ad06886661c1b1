//! Shared transfer limiter
//!
//! One token is held for the duration of a single copy+sync section, across
//! every writer. Holder counts are tracked so tests and metrics can observe
//! the concurrency actually reached.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Default)]
struct Holders {
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// Counting token pool bounding concurrent transfers
#[derive(Debug, Clone)]
pub struct Limiter {
    semaphore: Arc<Semaphore>,
    holders: Arc<Holders>,
    capacity: usize,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            holders: Arc::new(Holders::default()),
            capacity,
        }
    }

    /// Wait for a token; released when the returned permit is dropped
    pub async fn acquire(&self) -> TransferPermit {
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore never leaves this type and is never closed
            Err(_) => unreachable!("transfer semaphore closed"),
        };

        let current = self.holders.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.holders.peak.fetch_max(current, Ordering::SeqCst);

        TransferPermit {
            _permit: permit,
            holders: Arc::clone(&self.holders),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.holders.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous holders observed
    pub fn peak(&self) -> usize {
        self.holders.peak.load(Ordering::SeqCst)
    }
}

/// Permission to run one transfer+sync section
#[derive(Debug)]
pub struct TransferPermit {
    _permit: OwnedSemaphorePermit,
    holders: Arc<Holders>,
}

impl Drop for TransferPermit {
    fn drop(&mut self) {
        // Decrement before the semaphore permit is released so `current` never overshoots
        self.holders.current.fetch_sub(1, Ordering::SeqCst);
    }
}
