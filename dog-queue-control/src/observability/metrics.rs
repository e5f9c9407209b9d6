use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::RwLock;

/// Which counter an event bumps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    Enqueued,
    Duplicate,
    Admitted,
    Rejected,
    Retried,
    Continued,
    Completed,
    Exhausted,
    IterationLimit,
    Failed,
}

/// Live counters of control decisions
#[derive(Default)]
pub struct LiveMetrics {
    enqueued: AtomicU64,
    duplicates: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
    continued: AtomicU64,
    completed: AtomicU64,
    exhausted: AtomicU64,
    iteration_limit: AtomicU64,
    failed: AtomicU64,

    job_type_metrics: RwLock<HashMap<String, JobTypeMetrics>>,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment(&self, counter: Counter, job_type: &str) {
        let global = match counter {
            Counter::Enqueued => &self.enqueued,
            Counter::Duplicate => &self.duplicates,
            Counter::Admitted => &self.admitted,
            Counter::Rejected => &self.rejected,
            Counter::Retried => &self.retried,
            Counter::Continued => &self.continued,
            Counter::Completed => &self.completed,
            Counter::Exhausted => &self.exhausted,
            Counter::IterationLimit => &self.iteration_limit,
            Counter::Failed => &self.failed,
        };
        global.fetch_add(1, Ordering::Relaxed);

        let mut per_type = self.job_type_metrics.write();
        let entry = per_type.entry(job_type.to_string()).or_default();
        match counter {
            Counter::Enqueued => entry.enqueued += 1,
            Counter::Duplicate => entry.duplicates += 1,
            Counter::Admitted => entry.admitted += 1,
            Counter::Rejected => entry.rejected += 1,
            Counter::Retried => entry.retried += 1,
            Counter::Continued => entry.continued += 1,
            Counter::Completed => entry.completed += 1,
            Counter::Exhausted | Counter::IterationLimit | Counter::Failed => entry.failed += 1,
        }
    }

    /// Get metrics for a specific job type
    pub fn job_type_metrics(&self, job_type: &str) -> Option<JobTypeMetrics> {
        self.job_type_metrics.read().get(job_type).cloned()
    }

    /// Current values of the global counters
    pub fn snapshot(&self) -> GlobalMetrics {
        GlobalMetrics {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            continued: self.continued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            iteration_limit: self.iteration_limit.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Metrics for a specific job type. Every terminal failure counts as `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTypeMetrics {
    pub enqueued: u64,
    pub duplicates: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub retried: u64,
    pub continued: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobTypeMetrics {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            100.0
        } else {
            (self.completed as f64 / total as f64) * 100.0
        }
    }
}

/// Snapshot of the global counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalMetrics {
    pub enqueued: u64,
    pub duplicates: u64,
    pub admitted: u64,
    pub rejected: u64,
    pub retried: u64,
    pub continued: u64,
    pub completed: u64,
    pub exhausted: u64,
    pub iteration_limit: u64,
    pub failed: u64,
}

impl GlobalMetrics {
    /// Chains that ended in any terminal state
    pub fn terminal(&self) -> u64 {
        self.completed + self.exhausted + self.iteration_limit + self.failed
    }
}
