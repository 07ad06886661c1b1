use std::time::Duration;

/// Backoff and give-up rules for handing jobs to busy writers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt handoff wait is `attempt × base_delay`
    pub base_delay: Duration,
    /// Jobs that already made more attempts than this are failed
    pub max_retries: u32,
    /// Attempts after which each retry is logged at warn level
    pub warn_after: u32,
    /// Bound on putting a job back on the intake queue
    pub requeue_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_retries: 50,
            warn_after: 25,
            requeue_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// How long attempt number `attempt` may wait for room in a writer queue
    pub fn handoff_wait(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    /// Total handoff wait of a job that uses up every retry
    ///
    /// `base_delay × max_retries × (max_retries + 1) / 2`, saturating at
    /// [`Duration::MAX`].
    pub fn worst_case_backoff(&self) -> Duration {
        const NANOS_PER_SEC: u128 = 1_000_000_000;

        let retries = u128::from(self.max_retries);
        let nanos = self
            .base_delay
            .as_nanos()
            .saturating_mul(retries * (retries + 1) / 2);
        match u64::try_from(nanos / NANOS_PER_SEC) {
            Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
            Err(_) => Duration::MAX,
        }
    }

    pub fn exhausted(&self, retries: u32) -> bool {
        retries > self.max_retries
    }

    pub fn should_warn(&self, retries: u32) -> bool {
        retries > self.warn_after
    }
}
