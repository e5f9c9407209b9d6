use thiserror::Error;

/// Result type for control-layer operations
pub type ControlResult<T> = Result<T, ControlError>;

/// Infrastructure and configuration errors raised by the control layer
#[derive(Error, Debug, Clone)]
pub enum ControlError {
    /// The shared lock store could not be reached. Never treated as "not locked".
    #[error("Lock store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid job-type declaration, raised at registration time only
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Job type not registered: {0}")]
    JobTypeNotRegistered(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The dispatcher rejected an enqueue or dequeue
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Worker shutdown")]
    WorkerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a store-unavailable error
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Check if this error is an infrastructure fault of the lock store
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Classification given to a job body that panicked
pub const PANIC_KIND: &str = "Panic";

/// Classification given to unclassified retryable failures
pub const DEFAULT_KIND: &str = "JobError";

/// Job body failure - the classification drives the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Classified failure, subject to the job's retry policy
    #[error("{kind}: {message}")]
    Failed { kind: String, message: String },

    /// Permanent error - give up immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    /// Create a failure with an explicit classification (e.g. "TimeoutError")
    pub fn new(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create an unclassified retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::new(DEFAULT_KIND, msg)
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Failure produced by a panicking job body
    pub fn panic(msg: impl Into<String>) -> Self {
        Self::new(PANIC_KIND, msg)
    }

    /// Check if this error may be retried at all
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Error classification, `None` for permanent errors
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Failed { kind, .. } => Some(kind),
            Self::Permanent(_) => None,
        }
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Failed { message, .. } | Self::Permanent(message) => message,
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::Permanent(format!("Invalid job payload: {}", err))
    }
}
