use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Event protocol for structured observability of control decisions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job was enqueued
    Enqueued {
        job_id: JobId,
        queue: String,
        job_type: String,
        at: DateTime<Utc>,
    },

    /// Enqueue was dropped because the fingerprint is already locked
    Duplicate {
        lock_key: String,
        job_type: String,
        at: DateTime<Utc>,
    },

    /// Job passed admission and is about to run
    Admitted {
        job_id: JobId,
        attempt: u32,
        iteration: u32,
        at: DateTime<Utc>,
    },

    /// Dequeued job was dropped by the uniqueness guard
    Rejected {
        job_id: JobId,
        lock_key: String,
        at: DateTime<Utc>,
    },

    /// Failed attempt was re-enqueued
    RetryScheduled {
        job_id: JobId,
        next_attempt: u32,
        retry_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    /// Ordered or continuous chain was re-enqueued
    Continued {
        job_id: JobId,
        iteration: u32,
        at: DateTime<Utc>,
    },

    /// Chain reached a normal terminal state
    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    /// Retry policy gave up
    RetriesExhausted {
        job_id: JobId,
        attempts: u32,
        error: String,
        at: DateTime<Utc>,
    },

    /// Ordered or continuous chain ran out of iteration budget
    IterationLimitExceeded {
        job_id: JobId,
        iterations: u32,
        at: DateTime<Utc>,
    },

    /// Job without retry options failed
    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Duplicate { .. } => "duplicate",
            Self::Admitted { .. } => "admitted",
            Self::Rejected { .. } => "rejected",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Continued { .. } => "continued",
            Self::Completed { .. } => "completed",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::IterationLimitExceeded { .. } => "iteration_limit_exceeded",
            Self::Failed { .. } => "failed",
        }
    }

    /// Get the job ID, if the event concerns an identified job
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::Duplicate { .. } => None,
            Self::Enqueued { job_id, .. }
            | Self::Admitted { job_id, .. }
            | Self::Rejected { job_id, .. }
            | Self::RetryScheduled { job_id, .. }
            | Self::Continued { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::RetriesExhausted { job_id, .. }
            | Self::IterationLimitExceeded { job_id, .. }
            | Self::Failed { job_id, .. } => Some(job_id),
        }
    }

    /// Whether the event ends a chain
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. }
                | Self::RetriesExhausted { .. }
                | Self::IterationLimitExceeded { .. }
                | Self::Failed { .. }
        )
    }
}
