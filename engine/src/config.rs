//! Engine configuration.

use crate::resolver::ConflictPolicy;
use std::time::Duration;

/// Configuration for the sync coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How update/void operations are arbitrated.
    pub conflict_policy: ConflictPolicy,
    /// Storage retry behaviour inside a critical section.
    pub retry: RetryConfig,
    /// Movements between stock checkpoints.
    pub checkpoint_interval: u64,
    /// History page size when the caller gives none.
    pub default_history_limit: usize,
    /// Upper bound on a history page.
    pub max_history_limit: usize,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            retry: RetryConfig::default(),
            checkpoint_interval: 64,
            default_history_limit: 50,
            max_history_limit: 500,
        }
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the checkpoint interval. Zero disables checkpoints.
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_history_limits(mut self, default: usize, max: usize) -> Self {
        self.max_history_limit = max.max(1);
        self.default_history_limit = default.clamp(1, self.max_history_limit);
        self
    }

    /// Clamp a requested history page size.
    pub fn history_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_history_limit)
            .clamp(1, self.max_history_limit)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
