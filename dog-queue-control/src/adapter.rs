use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    AttemptError, ControlError, ControlResult, Job, JobError, JobEvent, JobId, JobMessage,
    JobPriority,
    config::ControlConfig,
    continuous::{ContinuousLoop, LoopStep},
    descriptor::JobDescriptor,
    dispatch::Dispatcher,
    failure::{FailureBackend, FailureKind, FailureReport, TracingFailureBackend},
    job::{JobRegistry, Outcome},
    observability::{ObservabilityLayer, analytics::BoxStream},
    ordered::{OrderedExecutor, OrderedState, OrderingState},
    retry::{RetryDecision, RetryPolicy},
    store::LockStore,
    unique::{HopClaim, LockKey, LockLease, UniquenessGuard},
};

/// Result of an enqueue request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(JobId),
    /// A chain with the same fingerprint is pending or running; nothing was enqueued
    Duplicate { lock_key: LockKey },
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::Enqueued(job_id) => Some(job_id),
            Self::Duplicate { .. } => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// What processing one dequeued message led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Terminal, normal completion. The lock was released.
    Completed,
    /// Ordered or continuous chain re-enqueued; the lock is retained
    Continued { iteration: u32 },
    /// Failed attempt re-enqueued; the lock is retained
    RetryScheduled { next_attempt: u32, delay: Duration },
    /// Terminal, the retry policy gave up
    RetriesExhausted { attempts: u32 },
    /// Terminal, the chain ran out of iterations
    IterationLimitExceeded { iterations: u32 },
    /// Another chain holds the fingerprint; the message was dropped
    AdmissionRejected { lock_key: LockKey },
    /// Terminal, failure of a job without retry options
    Failed,
}

impl Disposition {
    /// Whether the chain ended here
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::RetriesExhausted { .. } | Self::IterationLimitExceeded { .. } | Self::Failed
        )
    }
}

/// What to do with the chain once the body returned
struct Step {
    next: Option<JobMessage>,
    disposition: Disposition,
    event: JobEvent,
}

impl Step {
    fn finish(disposition: Disposition, event: JobEvent) -> Self {
        Self { next: None, disposition, event }
    }

    fn reenqueue(next: JobMessage, disposition: Disposition, event: JobEvent) -> Self {
        Self { next: Some(next), disposition, event }
    }
}

/// Handle for managing worker lifecycle
pub struct WorkerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<ControlResult<()>>,
}

impl WorkerHandle {
    /// Stop after the job in progress, if any, has been settled
    pub async fn shutdown(self) -> ControlResult<()> {
        let _ = self.shutdown_tx.send(());
        self.join_handle
            .await
            .map_err(|e| ControlError::Internal(format!("Worker join error: {}", e)))?
    }
}

/// Execution-control layer between a dispatcher and job bodies.
///
/// Admission (uniqueness), retries, ordered and continuous chains and
/// priority routing are decided here, per message, from the job type's
/// descriptor. Clones share all state.
#[derive(Clone)]
pub struct ControlAdapter {
    dispatcher: Arc<dyn Dispatcher>,
    store: Arc<dyn LockStore>,
    guard: UniquenessGuard,
    registry: Arc<RwLock<JobRegistry>>,
    failures: Arc<dyn FailureBackend>,
    observability: Arc<ObservabilityLayer>,
    config: ControlConfig,
}

impl ControlAdapter {
    pub fn new<D, S>(dispatcher: D, store: S) -> Self
    where
        D: Dispatcher + 'static,
        S: LockStore + 'static,
    {
        Self::with_config(dispatcher, store, ControlConfig::default())
    }

    pub fn with_config<D, S>(dispatcher: D, store: S, config: ControlConfig) -> Self
    where
        D: Dispatcher + 'static,
        S: LockStore + 'static,
    {
        let store: Arc<dyn LockStore> = Arc::new(store);
        Self {
            dispatcher: Arc::new(dispatcher),
            guard: UniquenessGuard::new(store.clone()),
            store,
            registry: Arc::new(RwLock::new(JobRegistry::new())),
            failures: Arc::new(TracingFailureBackend),
            observability: Arc::new(ObservabilityLayer::new()),
            config,
        }
    }

    pub fn with_failure_backend(mut self, backend: impl FailureBackend + 'static) -> Self {
        self.failures = Arc::new(backend);
        self
    }

    pub fn with_observability(mut self, observability: ObservabilityLayer) -> Self {
        self.observability = Arc::new(observability);
        self
    }

    /// Register a job type. Declaration conflicts surface here.
    pub fn register_job<J: Job>(&self) -> ControlResult<Arc<JobDescriptor>> {
        let descriptor = self.registry.write().register::<J>(&self.config)?;
        info!(
            job_type = J::JOB_TYPE,
            queue = descriptor.queue(),
            capabilities = ?descriptor.capabilities(),
            "Registered job type"
        );
        Ok(descriptor)
    }

    pub async fn enqueue<J: Job>(&self, job: &J) -> ControlResult<EnqueueOutcome> {
        self.enqueue_message(job, None, None).await
    }

    /// Enqueue at `priority`; only prioritized job types route on it
    pub async fn enqueue_with_priority<J: Job>(
        &self,
        job: &J,
        priority: JobPriority,
    ) -> ControlResult<EnqueueOutcome> {
        self.enqueue_message(job, Some(priority), None).await
    }

    /// Enqueue, eligible to run after `delay`
    pub async fn enqueue_in<J: Job>(&self, job: &J, delay: Duration) -> ControlResult<EnqueueOutcome> {
        self.enqueue_message(job, None, Some(delay)).await
    }

    #[instrument(skip(self, job), fields(job_type = J::JOB_TYPE))]
    async fn enqueue_message<J: Job>(
        &self,
        job: &J,
        priority: Option<JobPriority>,
        delay: Option<Duration>,
    ) -> ControlResult<EnqueueOutcome> {
        let descriptor = self.registry.read().descriptor(J::JOB_TYPE)?;
        let args = serde_json::to_value(job)?;
        let fingerprint = descriptor.fingerprint(&args);

        let mut message = JobMessage::new(J::JOB_TYPE, descriptor.queue_for(priority), args);
        message.priority = priority;
        if let Some(delay) = delay {
            message = message.with_delay(delay);
        }

        // the chain owns its fingerprint from the moment it is pending
        let lease = match &fingerprint {
            None => None,
            Some(fp) => {
                match self
                    .guard
                    .try_acquire(descriptor.queue(), fp, &message.job_id, descriptor.lock_ttl())
                    .await?
                {
                    Some(lease) => Some(lease),
                    None => {
                        let lock_key = LockKey::new(descriptor.queue(), fp);
                        warn!(lock_key = %lock_key, "Dropping duplicate enqueue");
                        self.observability.record(
                            J::JOB_TYPE,
                            JobEvent::Duplicate {
                                lock_key: lock_key.to_string(),
                                job_type: J::JOB_TYPE.to_string(),
                                at: Utc::now(),
                            },
                        );
                        return Ok(EnqueueOutcome::Duplicate { lock_key });
                    }
                }
            }
        };
        message.lock_held = lease.is_some();
        message.fingerprint = fingerprint;

        let job_id = message.job_id.clone();
        let queue = message.queue.clone();
        if let Err(e) = self.dispatcher.enqueue(message).await {
            error!("Failed to enqueue job, releasing its lock: {}", e);
            settle_release(lease).await;
            return Err(e);
        }
        if let Some(lease) = lease {
            lease.retain();
        }

        self.observability.record(
            J::JOB_TYPE,
            JobEvent::Enqueued {
                job_id: job_id.clone(),
                queue: queue.clone(),
                job_type: J::JOB_TYPE.to_string(),
                at: Utc::now(),
            },
        );
        info!(job_id = %job_id, queue = %queue, "Enqueued job");
        Ok(EnqueueOutcome::Enqueued(job_id))
    }

    /// Whether a chain with `job`'s fingerprint is pending or running.
    /// Always false for job types without uniqueness.
    pub async fn is_locked<J: Job>(&self, job: &J) -> ControlResult<bool> {
        let descriptor = self.registry.read().descriptor(J::JOB_TYPE)?;
        let args = serde_json::to_value(job)?;
        match descriptor.fingerprint(&args) {
            Some(fp) => self.guard.is_locked(descriptor.queue(), &fp).await,
            None => Ok(false),
        }
    }

    /// Dequeue and process one message from `queues`, tried in order.
    ///
    /// `Ok(None)` when nothing is eligible.
    pub async fn process_next<C>(&self, context: C, queues: &[&str]) -> ControlResult<Option<Disposition>>
    where
        C: Send + Sync + 'static,
    {
        self.process_next_shared(Arc::new(context), queues).await
    }

    async fn process_next_shared(
        &self,
        context: Arc<dyn Any + Send + Sync>,
        queues: &[&str],
    ) -> ControlResult<Option<Disposition>> {
        let message = match self.dispatcher.dequeue(queues).await? {
            Some(message) => message,
            None => return Ok(None),
        };

        let redelivery = message.clone();
        match self.process_message(message, context).await {
            // admission never happened; hand the message back untouched
            Err(e) if e.is_store_unavailable() => {
                self.dispatcher.enqueue(redelivery).await?;
                Err(e)
            }
            result => result.map(Some),
        }
    }

    /// Admission, body, then retry / continuation / release for one message.
    ///
    /// A message whose chain already owns the lock (enqueued through the
    /// adapter, retried or continued) claims its hop instead, so a second
    /// delivery of the same hop is rejected. A message without the lock must
    /// acquire it. `StoreUnavailable` during admission aborts before the body
    /// runs and mutates nothing.
    #[instrument(
        skip(self, message, context),
        fields(job_id = %message.job_id, job_type = %message.job_type, queue = %message.queue)
    )]
    pub async fn process_message(
        &self,
        message: JobMessage,
        context: Arc<dyn Any + Send + Sync>,
    ) -> ControlResult<Disposition> {
        let job = self.registry.read().get(&message.job_type)?.clone();
        let descriptor = job.descriptor.as_ref();

        let mut hop = None;
        let lease = match &message.fingerprint {
            None => None,
            Some(fp) if message.lock_held => {
                match self
                    .guard
                    .claim_hop(
                        descriptor.queue(),
                        fp,
                        &message.job_id,
                        message.attempt,
                        message.iteration,
                        descriptor.lock_ttl(),
                    )
                    .await?
                {
                    Some(claim) => {
                        hop = Some(claim);
                        Some(self.guard.resume(descriptor.queue(), fp))
                    }
                    None => {
                        let lock_key = LockKey::new(descriptor.queue(), fp);
                        return Ok(self.reject(&message, lock_key, "Admission rejected, hop is already running"));
                    }
                }
            }
            Some(fp) => {
                match self
                    .guard
                    .try_acquire(descriptor.queue(), fp, &message.job_id, descriptor.lock_ttl())
                    .await?
                {
                    Some(lease) => Some(lease),
                    None => {
                        let lock_key = LockKey::new(descriptor.queue(), fp);
                        return Ok(self.reject(&message, lock_key, "Admission rejected, fingerprint is locked"));
                    }
                }
            }
        };

        self.observability.record(
            &message.job_type,
            JobEvent::Admitted {
                job_id: message.job_id.clone(),
                attempt: message.attempt,
                iteration: message.iteration,
                at: Utc::now(),
            },
        );
        debug!(attempt = message.attempt, iteration = message.iteration, "Running job");

        let result = AssertUnwindSafe(job.handler.execute(&message, context))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::panic(panic_message(panic.as_ref()))));

        let step = match result {
            Ok(outcome) => self.after_success(descriptor, &message, outcome).await,
            Err(error) => self.after_failure(descriptor, &message, error).await,
        };

        match step.next {
            Some(next) => {
                if let Err(e) = self.dispatcher.enqueue(next).await {
                    error!("Failed to re-enqueue chain, releasing its lock: {}", e);
                    settle_release(lease).await;
                    settle_hop(hop).await;
                    return Err(e);
                }
                if let Some(lease) = lease {
                    lease.retain();
                }
            }
            None => settle_release(lease).await,
        }
        settle_hop(hop).await;

        self.observability.record(&message.job_type, step.event);
        Ok(step.disposition)
    }

    fn reject(&self, message: &JobMessage, lock_key: LockKey, reason: &str) -> Disposition {
        warn!(lock_key = %lock_key, "{}", reason);
        self.observability.record(
            &message.job_type,
            JobEvent::Rejected {
                job_id: message.job_id.clone(),
                lock_key: lock_key.to_string(),
                at: Utc::now(),
            },
        );
        Disposition::AdmissionRejected { lock_key }
    }

    async fn after_success(&self, descriptor: &JobDescriptor, message: &JobMessage, outcome: Outcome) -> Step {
        if message.attempt > 1 {
            self.clear_retry_key(descriptor, message).await;
        }

        if let Some(ordering) = descriptor.ordering() {
            let state = OrderingState::at(message.iteration);
            match OrderedExecutor::new(ordering).advance(state, &outcome) {
                OrderedState::Continuing(iteration) => {
                    let carry = match outcome {
                        Outcome::SuccessContinue(carry) => Some(carry),
                        Outcome::Success | Outcome::Stop => message.carry.clone(),
                    };
                    return self.continued(message, iteration, carry);
                }
                OrderedState::Aborted(reason) => {
                    error!(severity = "critical", "Ordered chain aborted: {}", reason);
                    let iterations = ordering.get_max_iterations();
                    return self
                        .iteration_limit(descriptor, message, iterations, reason.to_string())
                        .await;
                }
                OrderedState::Done | OrderedState::Running(_) => {}
            }
        } else if let Some(continuous) = descriptor.continuous() {
            match ContinuousLoop::new(*continuous).advance(message.iteration, message.carry.as_ref(), &outcome) {
                LoopStep::Continue { iteration, carry } => return self.continued(message, iteration, carry),
                LoopStep::LimitReached { runs } => {
                    error!(severity = "critical", runs, "Continuous loop hit its run bound");
                    return self
                        .iteration_limit(descriptor, message, runs, format!("run bound of {} reached", runs))
                        .await;
                }
                LoopStep::Stopped => {}
            }
        }

        info!(outcome = outcome.name(), "Job completed");
        Step::finish(
            Disposition::Completed,
            JobEvent::Completed {
                job_id: message.job_id.clone(),
                at: Utc::now(),
            },
        )
    }

    fn continued(&self, message: &JobMessage, iteration: u32, carry: Option<serde_json::Value>) -> Step {
        debug!(iteration, "Continuing chain");
        Step::reenqueue(
            message.continuation(iteration, carry),
            Disposition::Continued { iteration },
            JobEvent::Continued {
                job_id: message.job_id.clone(),
                iteration,
                at: Utc::now(),
            },
        )
    }

    async fn iteration_limit(
        &self,
        descriptor: &JobDescriptor,
        message: &JobMessage,
        iterations: u32,
        reason: String,
    ) -> Step {
        self.report(descriptor, message, FailureKind::IterationLimitExceeded, reason, message.errors.clone())
            .await;
        Step::finish(
            Disposition::IterationLimitExceeded { iterations },
            JobEvent::IterationLimitExceeded {
                job_id: message.job_id.clone(),
                iterations,
                at: Utc::now(),
            },
        )
    }

    async fn after_failure(&self, descriptor: &JobDescriptor, message: &JobMessage, error: JobError) -> Step {
        let now = Utc::now();
        let attempt_error = AttemptError {
            attempt: message.attempt,
            iteration: message.iteration,
            kind: error.kind().map(str::to_string),
            message: error.message().to_string(),
            at: now,
        };
        let mut history = message.errors.clone();
        history.push(attempt_error.clone());

        let policy = match descriptor.retry() {
            Some(policy) => policy,
            None => {
                error!("Job failed: {}", error);
                self.report(descriptor, message, FailureKind::Failed, error.to_string(), history)
                    .await;
                return Step::finish(
                    Disposition::Failed,
                    JobEvent::Failed {
                        job_id: message.job_id.clone(),
                        error: error.to_string(),
                        at: now,
                    },
                );
            }
        };

        match policy.on_failure(message.attempt, &error) {
            RetryDecision::Retry { delay, next_attempt } => {
                self.mark_retry_key(descriptor, message, policy).await;
                warn!(next_attempt, delay_secs = delay.as_secs_f64(), "Job failed, retrying: {}", error);

                let retry_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                Step::reenqueue(
                    message.retry(attempt_error, delay),
                    Disposition::RetryScheduled { next_attempt, delay },
                    JobEvent::RetryScheduled {
                        job_id: message.job_id.clone(),
                        next_attempt,
                        retry_at,
                        error: error.to_string(),
                        at: now,
                    },
                )
            }
            RetryDecision::GiveUp(reason) => {
                if message.attempt > 1 {
                    self.clear_retry_key(descriptor, message).await;
                }
                error!(attempts = message.attempt, "Giving up on job ({}): {}", reason, error);
                self.report(
                    descriptor,
                    message,
                    FailureKind::RetriesExhausted,
                    format!("{}: {}", reason, error),
                    history,
                )
                .await;
                Step::finish(
                    Disposition::RetriesExhausted { attempts: message.attempt },
                    JobEvent::RetriesExhausted {
                        job_id: message.job_id.clone(),
                        attempts: message.attempt,
                        error: error.to_string(),
                        at: now,
                    },
                )
            }
        }
    }

    async fn report(
        &self,
        descriptor: &JobDescriptor,
        message: &JobMessage,
        kind: FailureKind,
        reason: String,
        errors: Vec<AttemptError>,
    ) {
        let report = FailureReport {
            job_id: message.job_id.clone(),
            job_type: descriptor.job_type().to_string(),
            queue: message.queue.clone(),
            args: message.args.clone(),
            kind,
            severity: kind.severity(),
            reason,
            attempts: message.attempt,
            iteration: message.iteration,
            errors,
            at: Utc::now(),
        };
        if let Err(e) = self.failures.report(report).await {
            error!("Failure backend rejected report: {}", e);
        }
    }

    fn retry_key(descriptor: &JobDescriptor, message: &JobMessage) -> String {
        let ident = message.fingerprint.as_deref().unwrap_or_else(|| message.job_id.as_str());
        RetryPolicy::retry_key(descriptor.queue(), ident)
    }

    // The retry-tracking key is bookkeeping; store faults here do not fail the chain.
    async fn mark_retry_key(&self, descriptor: &JobDescriptor, message: &JobMessage, policy: &RetryPolicy) {
        let key = Self::retry_key(descriptor, message);
        if let Err(e) = self
            .store
            .set_if_absent(&key, message.job_id.as_str(), policy.expire_retry_key_after())
            .await
        {
            warn!(retry_key = %key, "Failed to write retry key: {}", e);
        }
    }

    async fn clear_retry_key(&self, descriptor: &JobDescriptor, message: &JobMessage) {
        let key = Self::retry_key(descriptor, message);
        if let Err(e) = self.store.delete(&key).await {
            warn!(retry_key = %key, "Failed to delete retry key: {}", e);
        }
    }

    /// Start a worker draining `queues` in order; all registered queues when empty
    #[instrument(skip(self, context))]
    pub fn start_workers<C>(&self, context: C, queues: Vec<String>) -> ControlResult<WorkerHandle>
    where
        C: Send + Sync + 'static,
    {
        let queues = if queues.is_empty() {
            self.registry.read().queues()
        } else {
            queues
        };
        if queues.is_empty() {
            return Err(ControlError::configuration("worker has no queues to drain"));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = Worker {
            adapter: self.clone(),
            context: Arc::new(context),
            queues,
            shutdown_rx,
        };

        let join_handle = tokio::spawn(worker.run());
        Ok(WorkerHandle {
            shutdown_tx,
            join_handle,
        })
    }

    /// Subscribe to control events
    pub fn event_stream(&self) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.observability.event_stream()
    }

    pub fn boxed_event_stream(&self) -> BoxStream<JobEvent> {
        self.observability.boxed_event_stream()
    }

    pub fn observability(&self) -> &ObservabilityLayer {
        &self.observability
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    pub fn descriptor(&self, job_type: &str) -> ControlResult<Arc<JobDescriptor>> {
        self.registry.read().descriptor(job_type)
    }
}

async fn settle_release(lease: Option<LockLease>) {
    if let Some(lease) = lease {
        let key = lease.key().clone();
        if let Err(e) = lease.release().await {
            warn!(lock_key = %key, "Failed to release lock, TTL will reclaim it: {}", e);
        }
    }
}

async fn settle_hop(hop: Option<HopClaim>) {
    if let Some(hop) = hop {
        hop.settle().await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "job body panicked".to_string()
    }
}

/// Polls the dispatcher and processes one message at a time
struct Worker {
    adapter: ControlAdapter,
    context: Arc<dyn Any + Send + Sync>,
    queues: Vec<String>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl Worker {
    async fn run(mut self) -> ControlResult<()> {
        let queue_refs: Vec<&str> = self.queues.iter().map(String::as_str).collect();
        info!("Worker started for queues: {:?}", self.queues);

        loop {
            // a message in flight is always settled before shutdown is honoured
            match self.shutdown_rx.try_recv() {
                Err(oneshot::error::TryRecvError::Empty) => {}
                _ => break,
            }

            let pause = match self.adapter.process_next_shared(self.context.clone(), &queue_refs).await {
                Ok(Some(_)) => None,
                Ok(None) => Some(self.adapter.config.poll_interval),
                Err(e) => {
                    error!("Error processing job: {}", e);
                    Some(self.adapter.config.error_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = &mut self.shutdown_rx => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        info!("Worker stopped");
        Ok(())
    }
}
