//! Where terminal failures are surfaced.

use std::fmt;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::{AttemptError, ControlResult, JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The retry policy gave up
    RetriesExhausted,
    /// An ordered or continuous chain ran out of iterations
    IterationLimitExceeded,
    /// A job without retry options failed
    Failed,
}

impl FailureKind {
    /// Budget exhaustion points at a logic or config problem and is reported louder
    pub fn severity(self) -> Severity {
        match self {
            Self::IterationLimitExceeded => Severity::Critical,
            Self::RetriesExhausted | Self::Failed => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Critical => f.write_str("critical"),
        }
    }
}

/// A terminal failure with its full attempt history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub job_id: JobId,
    pub job_type: String,
    pub queue: String,
    pub args: Value,
    pub kind: FailureKind,
    pub severity: Severity,
    pub reason: String,
    pub attempts: u32,
    pub iteration: u32,
    pub errors: Vec<AttemptError>,
    pub at: DateTime<Utc>,
}

/// Sink for terminal failures
#[async_trait]
pub trait FailureBackend: Send + Sync {
    async fn report(&self, report: FailureReport) -> ControlResult<()>;
}

/// Logs every report through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureBackend;

#[async_trait]
impl FailureBackend for TracingFailureBackend {
    async fn report(&self, report: FailureReport) -> ControlResult<()> {
        error!(
            job_id = %report.job_id,
            job_type = %report.job_type,
            queue = %report.queue,
            severity = %report.severity,
            attempts = report.attempts,
            iteration = report.iteration,
            errors = report.errors.len(),
            "{:?}: {}",
            report.kind,
            report.reason
        );
        Ok(())
    }
}

/// Collects reports in memory for tests and inspection
#[derive(Debug, Clone, Default)]
pub struct MemoryFailureBackend {
    reports: Arc<Mutex<Vec<FailureReport>>>,
}

impl MemoryFailureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

#[async_trait]
impl FailureBackend for MemoryFailureBackend {
    async fn report(&self, report: FailureReport) -> ControlResult<()> {
        self.reports.lock().push(report);
        Ok(())
    }
}
