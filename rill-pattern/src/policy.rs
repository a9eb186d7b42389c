//! Batch, retry and consumer policies.
//!
//! Policies are plain values: built once, then shared read-only by every
//! worker of a pool.

use std::time::Duration;

use crate::error::{PatternError, PatternResult};

// -----------------------------------------------------------------------------
// Batch Policy
// -----------------------------------------------------------------------------

/// When a consumer commits what it has processed.
///
/// A batch is ready when it holds `capacity` messages, when `flush_interval`
/// has elapsed since its first message, or when a force-batch message is
/// processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    capacity: u32,
    flush_interval: Duration,
}

impl BatchPolicy {
    /// 10 messages or 1 second.
    pub const DEFAULT: Self = Self {
        capacity: 10,
        flush_interval: Duration::from_secs(1),
    };

    /// Commit after every message.
    pub const NO_BATCH: Self = Self {
        capacity: 1,
        flush_interval: Duration::from_secs(1),
    };

    /// Creates a batch policy.
    #[must_use]
    pub const fn new(capacity: u32, flush_interval: Duration) -> Self {
        Self {
            capacity,
            flush_interval,
        }
    }

    /// Returns the number of messages that completes a batch.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the maximum age of a batch.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        self.flush_interval
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// -----------------------------------------------------------------------------
// Retry Policy
// -----------------------------------------------------------------------------

/// How many times a failed batch is redelivered, and how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Never retry.
    pub const NONE: Self = Self {
        max_retries: 0,
        delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    /// 3 retries, backing off from 10ms up to 1s.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
    };

    /// Creates a retry policy with the default delays.
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::DEFAULT
        }
    }

    /// Sets the delay before the first retry and the cap on later ones.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration, max_delay: Duration) -> Self {
        self.delay = delay;
        self.max_delay = max_delay;
        self
    }

    /// Returns the number of redeliveries of one batch.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the delay before retry number `attempt` (1-based).
    ///
    /// The delay doubles on every attempt, capped at the maximum delay.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay.max(self.delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// -----------------------------------------------------------------------------
// Consumer Policy
// -----------------------------------------------------------------------------

/// What a consumer does when no message arrives in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationMode {
    /// Stop once no message arrived for `wait_message_timeout`.
    Bounded,
    /// Keep waiting until a poison pill arrives on every owned partition.
    Unbounded,
}

/// Where a consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// The beginning of each partition.
    Begin,
    /// The end of each partition: only new messages are consumed.
    End,
    /// The last position committed by the consumer group.
    LastCommitted,
}

/// Everything a consumer pool needs to know to run its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerPolicy {
    wait_message_timeout: Duration,
    continue_on_failure: bool,
    max_threads: u16,
    batch_policy: BatchPolicy,
    retry_policy: RetryPolicy,
    termination_mode: TerminationMode,
    start_offset: StartOffset,
}

impl ConsumerPolicy {
    /// Stops after 2 seconds without messages, fails fast.
    pub const BOUNDED: Self = Self {
        wait_message_timeout: Duration::from_secs(2),
        continue_on_failure: false,
        max_threads: 0,
        batch_policy: BatchPolicy::DEFAULT,
        retry_policy: RetryPolicy::NONE,
        termination_mode: TerminationMode::Bounded,
        start_offset: StartOffset::LastCommitted,
    };

    /// Runs until poison pills, fails fast.
    pub const UNBOUNDED: Self = Self {
        wait_message_timeout: Duration::from_secs(1),
        termination_mode: TerminationMode::Unbounded,
        ..Self::BOUNDED
    };

    /// Starts a builder from [`ConsumerPolicy::BOUNDED`].
    #[must_use]
    pub const fn builder() -> ConsumerPolicyBuilder {
        ConsumerPolicyBuilder {
            policy: Self::BOUNDED,
        }
    }

    /// Returns how long a read waits for a message.
    #[must_use]
    pub const fn wait_message_timeout(&self) -> Duration {
        self.wait_message_timeout
    }

    /// Returns true if a failed batch is retried instead of stopping.
    #[must_use]
    pub const fn continue_on_failure(&self) -> bool {
        self.continue_on_failure
    }

    /// Returns the maximum number of workers, 0 for one per partition.
    #[must_use]
    pub const fn max_threads(&self) -> u16 {
        self.max_threads
    }

    /// Returns the batch policy.
    #[must_use]
    pub const fn batch_policy(&self) -> BatchPolicy {
        self.batch_policy
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Returns the termination mode.
    #[must_use]
    pub const fn termination_mode(&self) -> TerminationMode {
        self.termination_mode
    }

    /// Returns where workers start reading.
    #[must_use]
    pub const fn start_offset(&self) -> StartOffset {
        self.start_offset
    }
}

impl Default for ConsumerPolicy {
    fn default() -> Self {
        Self::BOUNDED
    }
}

/// Builder for [`ConsumerPolicy`].
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct ConsumerPolicyBuilder {
    policy: ConsumerPolicy,
}

impl ConsumerPolicyBuilder {
    /// Sets how long a read waits for a message.
    pub const fn wait_message_timeout(mut self, timeout: Duration) -> Self {
        self.policy.wait_message_timeout = timeout;
        self
    }

    /// Retries failed batches instead of stopping the worker.
    pub const fn continue_on_failure(mut self, enabled: bool) -> Self {
        self.policy.continue_on_failure = enabled;
        self
    }

    /// Caps the number of workers, 0 for one per partition.
    pub const fn max_threads(mut self, max_threads: u16) -> Self {
        self.policy.max_threads = max_threads;
        self
    }

    /// Sets the batch policy.
    pub const fn batch_policy(mut self, batch_policy: BatchPolicy) -> Self {
        self.policy.batch_policy = batch_policy;
        self
    }

    /// Sets the retry policy.
    pub const fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.policy.retry_policy = retry_policy;
        self
    }

    /// Sets the termination mode.
    pub const fn termination_mode(mut self, mode: TerminationMode) -> Self {
        self.policy.termination_mode = mode;
        self
    }

    /// Sets where workers start reading.
    pub const fn start_offset(mut self, start_offset: StartOffset) -> Self {
        self.policy.start_offset = start_offset;
        self
    }

    /// Validates and returns the policy.
    ///
    /// # Errors
    /// Returns `InvalidPolicy` if the batch capacity is zero.
    pub fn build(self) -> PatternResult<ConsumerPolicy> {
        if self.policy.batch_policy.capacity == 0 {
            return Err(PatternError::InvalidPolicy {
                field: "batch_policy.capacity",
                reason: "must be positive",
            });
        }
        Ok(self.policy)
    }
}
