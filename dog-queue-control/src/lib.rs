//! # dog-queue-control: job admission and continuation control
//!
//! The layer between a queue's dispatcher and job bodies. For every dequeued
//! job it decides whether it may run now, whether it duplicates in-flight
//! work, how a failure is retried, and whether the job must be re-enqueued to
//! continue a multi-step chain.
//!
//! - **Uniqueness**: at most one pending-or-running chain per argument fingerprint,
//!   enforced through atomic create-if-absent locks in a shared store
//! - **Retries**: classified failures, per-classification delays, pluggable backoff
//! - **Ordered chains**: bounded re-enqueue with carry-forward state
//! - **Continuous loops**: re-enqueue until the body says stop
//! - **Priority routing**: priority-tagged queues drained high to low
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dog_queue_control::prelude::*;
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct RebuildReport {
//!     account_id: u64,
//! }
//!
//! #[async_trait]
//! impl Job for RebuildReport {
//!     type Context = ();
//!
//!     const JOB_TYPE: &'static str = "rebuild_report";
//!
//!     fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
//!         Ok(builder
//!             .queue("reports")
//!             .retries(
//!                 RetryOptions::new()
//!                     .limit(3)
//!                     .exception_delays([("TimeoutError", Duration::from_secs(5))]),
//!             )?
//!             .unique(|args| args["account_id"].to_string()))
//!     }
//!
//!     async fn execute(&self, _ctx: (), _run: &RunContext) -> Result<Outcome, JobError> {
//!         Ok(Outcome::Success)
//!     }
//! }
//!
//! # async fn run() -> ControlResult<()> {
//! let adapter = ControlAdapter::new(MemoryDispatcher::new(), MemoryLockStore::new());
//! adapter.register_job::<RebuildReport>()?;
//!
//! adapter.enqueue(&RebuildReport { account_id: 42 }).await?;
//! let worker = adapter.start_workers((), vec!["reports".to_string()])?;
//! worker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod continuous;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod failure;
pub mod job;
pub mod observability;
pub mod ordered;
pub mod retry;
pub mod store;
pub mod types;
pub mod unique;

pub use adapter::{ControlAdapter, Disposition, EnqueueOutcome, WorkerHandle};
pub use config::ControlConfig;
pub use continuous::ContinuousOptions;
pub use descriptor::{Capabilities, DescriptorBuilder, JobDescriptor};
pub use dispatch::{Dispatcher, MemoryDispatcher};
pub use error::{ControlError, ControlResult, JobError};
pub use failure::{FailureBackend, FailureKind, FailureReport, MemoryFailureBackend, Severity, TracingFailureBackend};
pub use job::{Job, JobRegistry, Outcome, RunContext};
pub use ordered::OrderingOptions;
pub use retry::{Backoff, ConstantBackoff, ExceptionTable, ExponentialBackoff, RetryDecision, RetryOptions, RetryPolicy};
pub use store::{LockStore, MemoryLockStore};
pub use types::{AttemptError, JobEvent, JobId, JobMessage, JobPriority, PrioritySelector};
pub use unique::{HopClaim, LockKey, UniquenessGuard};

pub use observability::{LiveMetrics, ObservabilityLayer};

#[cfg(feature = "redis")]
pub use store::RedisLockStore;

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

pub mod prelude {
    pub use crate::{
        ControlAdapter, ControlConfig, ControlError, ControlResult, Disposition, EnqueueOutcome,
    };

    pub use crate::{
        ContinuousOptions, DescriptorBuilder, Job, JobError, JobPriority, OrderingOptions, Outcome,
        RetryOptions, RunContext,
    };

    pub use crate::{LockStore, MemoryDispatcher, MemoryLockStore};

    pub use crate::{FailureBackend, MemoryFailureBackend, ObservabilityLayer};

    pub use async_trait::async_trait;
}
