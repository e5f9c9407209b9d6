use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{JobId, JobPriority};

/// A failed attempt, kept in the message for failure reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptError {
    pub attempt: u32,
    pub iteration: u32,
    pub kind: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One execution attempt as it travels through the dispatcher.
///
/// Retry attempt numbers and ordering iterations ride in the payload rather
/// than the lock store, so the store stays the only shared mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    /// Logical unit of work, shared by every attempt of a chain
    pub job_id: JobId,

    /// Job type identifier for dispatch
    pub job_type: String,

    /// Queue the message is routed to (priority-tagged for prioritized jobs)
    pub queue: String,

    /// Original job arguments
    pub args: Value,

    /// Retry attempt, starts at 1
    pub attempt: u32,

    /// Ordering / continuous iteration, starts at 0
    pub iteration: u32,

    /// State the job body chose to carry to the next iteration
    pub carry: Option<Value>,

    /// Fingerprint computed once per chain; continuations reuse it
    pub fingerprint: Option<String>,

    /// Set on continuations of a chain that already owns its uniqueness lock
    pub lock_held: bool,

    /// Priority chosen at enqueue time
    pub priority: Option<JobPriority>,

    /// When the message becomes eligible for dequeue
    pub run_at: DateTime<Utc>,

    /// When the chain was first enqueued
    pub enqueued_at: DateTime<Utc>,

    /// History of failed attempts
    pub errors: Vec<AttemptError>,
}

impl JobMessage {
    /// Create the first attempt of a new chain
    pub fn new(job_type: impl Into<String>, queue: impl Into<String>, args: Value) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            job_type: job_type.into(),
            queue: queue.into(),
            args,
            attempt: 1,
            iteration: 0,
            carry: None,
            fingerprint: None,
            lock_held: false,
            priority: None,
            run_at: now,
            enqueued_at: now,
            errors: Vec::new(),
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Delay eligibility by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        self
    }

    /// Check if the message is eligible to run at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now
    }

    /// Next retry attempt of this message, lock retained
    pub fn retry(&self, error: AttemptError, delay: Duration) -> Self {
        let mut next = self.clone().with_delay(delay);
        next.attempt = self.attempt.saturating_add(1);
        next.lock_held = self.fingerprint.is_some();
        next.errors.push(error);
        next
    }

    /// Next iteration of an ordered or continuous chain, lock retained
    pub fn continuation(&self, iteration: u32, carry: Option<Value>) -> Self {
        let mut next = self.clone();
        next.iteration = iteration;
        next.carry = carry;
        next.attempt = 1;
        next.lock_held = self.fingerprint.is_some();
        next.run_at = Utc::now();
        next
    }
}
