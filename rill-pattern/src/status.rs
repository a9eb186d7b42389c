//! Per-worker statuses returned by the pools.

use std::time::{Duration, Instant};

use rill_core::WorkerId;

/// Terminal state of a consumer worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerOutcome {
    /// Bounded worker saw no message for `wait_message_timeout`.
    Drained,
    /// Every owned partition delivered a poison pill.
    Stopped,
    /// Processing or the log failed.
    Failed,
    /// The pool was closed while the worker was running.
    Cancelled,
}

impl WorkerOutcome {
    /// Returns true for outcomes that flag the worker as failed.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    /// Returns a short label for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drained => "drained",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// What one producer worker did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerStatus {
    /// The worker.
    pub worker_id: WorkerId,
    /// Number of messages appended.
    pub nb_processed: u64,
    /// When the worker started.
    pub started_at: Instant,
    /// When the worker stopped.
    pub stopped_at: Instant,
}

impl ProducerStatus {
    pub(crate) fn new(worker_id: WorkerId) -> Self {
        let now = Instant::now();
        Self {
            worker_id,
            nb_processed: 0,
            started_at: now,
            stopped_at: now,
        }
    }

    /// Returns how long the worker ran.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.stopped_at.saturating_duration_since(self.started_at)
    }
}

/// What one consumer worker did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerStatus {
    /// The worker.
    pub worker_id: WorkerId,
    /// Successful `accept` calls, redeliveries included.
    pub accepted: u64,
    /// Distinct messages whose position was committed.
    pub committed: u64,
    /// Number of committed batches.
    pub batch_commits: u64,
    /// Number of batches rolled back.
    pub batch_failures: u64,
    /// True if the worker did not finish cleanly.
    pub fail: bool,
    /// How the worker finished.
    pub outcome: WorkerOutcome,
    /// When the worker started.
    pub started_at: Instant,
    /// When the worker stopped.
    pub stopped_at: Instant,
}

impl ConsumerStatus {
    pub(crate) fn new(worker_id: WorkerId) -> Self {
        let now = Instant::now();
        Self {
            worker_id,
            accepted: 0,
            committed: 0,
            batch_commits: 0,
            batch_failures: 0,
            fail: false,
            outcome: WorkerOutcome::Drained,
            started_at: now,
            stopped_at: now,
        }
    }

    /// Freezes the status with its outcome.
    pub(crate) fn finish(&mut self, outcome: WorkerOutcome) {
        self.outcome = outcome;
        self.fail = outcome.is_failure();
        self.stopped_at = Instant::now();
    }

    /// Returns how long the worker ran.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.stopped_at.saturating_duration_since(self.started_at)
    }
}

/// Totals over the statuses of one pool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    /// Number of workers.
    pub workers: usize,
    /// Messages appended (producers) or committed (consumers).
    pub processed: u64,
    /// Successful `accept` calls (consumers only).
    pub accepted: u64,
    /// Workers flagged as failed.
    pub failures: usize,
    /// From the first start to the last stop.
    pub elapsed: Duration,
}

impl PoolSummary {
    /// Summarizes producer statuses.
    #[must_use]
    pub fn of_producers(statuses: &[ProducerStatus]) -> Self {
        Self {
            workers: statuses.len(),
            processed: statuses.iter().map(|s| s.nb_processed).sum(),
            accepted: 0,
            failures: 0,
            elapsed: span(statuses.iter().map(|s| (s.started_at, s.stopped_at))),
        }
    }

    /// Summarizes consumer statuses.
    #[must_use]
    pub fn of_consumers(statuses: &[ConsumerStatus]) -> Self {
        Self {
            workers: statuses.len(),
            processed: statuses.iter().map(|s| s.committed).sum(),
            accepted: statuses.iter().map(|s| s.accepted).sum(),
            failures: statuses.iter().filter(|s| s.fail).count(),
            elapsed: span(statuses.iter().map(|s| (s.started_at, s.stopped_at))),
        }
    }

    /// Returns processed messages per second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.processed as f64 / secs
    }
}

fn span(bounds: impl Iterator<Item = (Instant, Instant)>) -> Duration {
    let mut first: Option<Instant> = None;
    let mut last: Option<Instant> = None;
    for (started, stopped) in bounds {
        first = Some(first.map_or(started, |f| f.min(started)));
        last = Some(last.map_or(stopped, |l| l.max(stopped)));
    }
    match (first, last) {
        (Some(first), Some(last)) => last.saturating_duration_since(first),
        _ => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_sets_fail() {
        let mut status = ConsumerStatus::new(WorkerId::new(0));
        status.finish(WorkerOutcome::Stopped);
        assert!(!status.fail);
        status.finish(WorkerOutcome::Cancelled);
        assert!(status.fail);
        assert_eq!(status.outcome.as_str(), "cancelled");
    }

    #[test]
    fn test_summary_totals() {
        let mut a = ConsumerStatus::new(WorkerId::new(0));
        a.accepted = 12;
        a.committed = 10;
        let mut b = ConsumerStatus::new(WorkerId::new(1));
        b.accepted = 3;
        b.finish(WorkerOutcome::Failed);

        let summary = PoolSummary::of_consumers(&[a, b]);
        assert_eq!(summary.workers, 2);
        assert_eq!(summary.processed, 10);
        assert_eq!(summary.accepted, 15);
        assert_eq!(summary.failures, 1);

        assert_eq!(PoolSummary::of_producers(&[]).elapsed, Duration::ZERO);
        assert!(PoolSummary::of_producers(&[]).throughput().abs() < f64::EPSILON);
    }
}
