//! Immutable per-job-type descriptor, built once at registration.

use std::time::Duration;
use serde_json::Value;

use crate::{
    ControlError, ControlResult,
    config::ControlConfig,
    continuous::ContinuousOptions,
    ordered::OrderingOptions,
    retry::{RetryOptions, RetryPolicy},
    types::{JobPriority, PrioritySelector},
    unique::Uniqueness,
};

pub const DEFAULT_QUEUE: &str = "default";

/// Which control capabilities a job type carries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub unique: bool,
    pub retries: bool,
    pub ordered: bool,
    pub continuous: bool,
    pub prioritized: bool,
}

/// Declarative builder handed to [`Job::configure`](crate::Job::configure)
#[derive(Debug)]
pub struct DescriptorBuilder {
    job_type: String,
    queue: String,
    uniqueness: Option<Uniqueness>,
    retry: Option<RetryOptions>,
    ordering: Option<OrderingOptions>,
    continuous: Option<ContinuousOptions>,
    prioritized: bool,
    lock_ttl: Option<Duration>,
}

impl DescriptorBuilder {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            queue: DEFAULT_QUEUE.to_string(),
            uniqueness: None,
            retry: None,
            ordering: None,
            continuous: None,
            prioritized: false,
            lock_ttl: None,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// At most one pending-or-running job per fingerprint of its arguments
    pub fn unique<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.uniqueness = Some(Uniqueness::new(f));
        self
    }

    /// Retry failed attempts.
    ///
    /// Must be declared before `unique`; the reverse order is rejected.
    pub fn retries(mut self, options: RetryOptions) -> ControlResult<Self> {
        if self.uniqueness.is_some() {
            return Err(ControlError::configuration(format!(
                "{}: retries must be declared before unique",
                self.job_type
            )));
        }
        self.retry = Some(options);
        Ok(self)
    }

    /// Run as a bounded chain of iterations
    pub fn ordered(mut self, options: OrderingOptions) -> ControlResult<Self> {
        if self.continuous.is_some() {
            return Err(self.conflict());
        }
        self.ordering = Some(options);
        Ok(self)
    }

    /// Re-enqueue after every successful run until the body stops
    pub fn continuous(mut self, options: ContinuousOptions) -> ControlResult<Self> {
        if self.ordering.is_some() {
            return Err(self.conflict());
        }
        self.continuous = Some(options);
        Ok(self)
    }

    /// Route to a priority-tagged queue per enqueue
    pub fn prioritized(mut self) -> Self {
        self.prioritized = true;
        self
    }

    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    fn conflict(&self) -> ControlError {
        ControlError::configuration(format!(
            "{}: ordered and continuous cannot be combined",
            self.job_type
        ))
    }

    /// Validate and resolve against the default configuration
    pub fn build(self) -> ControlResult<JobDescriptor> {
        self.build_with(&ControlConfig::default())
    }

    /// Validate and resolve against `config`
    pub fn build_with(self, config: &ControlConfig) -> ControlResult<JobDescriptor> {
        if self.job_type.is_empty() {
            return Err(ControlError::configuration("job type must not be empty"));
        }
        if self.queue.is_empty() {
            return Err(ControlError::configuration(format!(
                "{}: queue must not be empty",
                self.job_type
            )));
        }
        if let Some(ordering) = &self.ordering {
            ordering.validate()?;
        }
        if let Some(continuous) = &self.continuous {
            continuous.validate()?;
        }
        let lock_ttl = self.lock_ttl.unwrap_or(config.default_lock_ttl);
        if lock_ttl.is_zero() {
            return Err(ControlError::configuration(format!(
                "{}: lock ttl must be positive",
                self.job_type
            )));
        }

        let retry = self
            .retry
            .map(|options| options.resolve(&config.temporary_exceptions))
            .transpose()?;

        Ok(JobDescriptor {
            job_type: self.job_type,
            queue: self.queue,
            uniqueness: self.uniqueness,
            retry,
            ordering: self.ordering,
            continuous: self.continuous,
            prioritized: self.prioritized,
            lock_ttl,
        })
    }
}

/// Resolved configuration of a job type
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    job_type: String,
    queue: String,
    uniqueness: Option<Uniqueness>,
    retry: Option<RetryPolicy>,
    ordering: Option<OrderingOptions>,
    continuous: Option<ContinuousOptions>,
    prioritized: bool,
    lock_ttl: Duration,
}

impl JobDescriptor {
    pub fn builder(job_type: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(job_type)
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// Declared base queue; lock keys are scoped to it
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn ordering(&self) -> Option<&OrderingOptions> {
        self.ordering.as_ref()
    }

    pub fn continuous(&self) -> Option<&ContinuousOptions> {
        self.continuous.as_ref()
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    /// Fingerprint function of the chain: ordering's own, else the job's
    pub fn fingerprint_source(&self) -> Option<&Uniqueness> {
        self.ordering
            .as_ref()
            .and_then(OrderingOptions::uniqueness)
            .or(self.uniqueness.as_ref())
    }

    pub fn fingerprint(&self, args: &Value) -> Option<String> {
        self.fingerprint_source().map(|u| u.fingerprint(args))
    }

    pub fn is_unique(&self) -> bool {
        self.fingerprint_source().is_some()
    }

    pub fn is_prioritized(&self) -> bool {
        self.prioritized
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            unique: self.is_unique(),
            retries: self.retry.is_some(),
            ordered: self.ordering.is_some(),
            continuous: self.continuous.is_some(),
            prioritized: self.prioritized,
        }
    }

    /// Physical queue for an enqueue at `priority`.
    ///
    /// Non-prioritized types ignore the priority.
    pub fn queue_for(&self, priority: Option<JobPriority>) -> String {
        if self.prioritized {
            PrioritySelector::queue_for(&self.queue, priority.unwrap_or_default())
        } else {
            self.queue.clone()
        }
    }

    /// Physical queues a worker should drain for this type, in drain order
    pub fn queues(&self) -> Vec<String> {
        if self.prioritized {
            PrioritySelector::queues_for(&self.queue)
        } else {
            vec![self.queue.clone()]
        }
    }
}
