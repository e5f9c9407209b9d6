use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use dog_queue_control::{
    ControlAdapter, ControlError, ControlResult, DescriptorBuilder, Dispatcher, Disposition,
    FailureKind, Job, JobError, JobMessage, JobPriority, MemoryDispatcher, MemoryFailureBackend,
    MemoryLockStore, OrderingOptions, ContinuousOptions, Outcome, RetryOptions, RunContext, Severity,
};

/// Shared state the job bodies report into
#[derive(Clone)]
struct Recorder {
    runs: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<String>>>,
    gate: Arc<Semaphore>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            runs: Arc::new(AtomicU32::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    /// Wait until `n` bodies have started
    async fn started(&self, n: u32) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.runs() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("bodies did not start");
    }
}

struct Harness {
    adapter: ControlAdapter,
    dispatcher: MemoryDispatcher,
    store: MemoryLockStore,
    failures: MemoryFailureBackend,
    recorder: Recorder,
}

impl Harness {
    fn new() -> Self {
        let dispatcher = MemoryDispatcher::new();
        let store = MemoryLockStore::new();
        let failures = MemoryFailureBackend::new();
        let adapter = ControlAdapter::new(dispatcher.clone(), store.clone())
            .with_failure_backend(failures.clone());

        Self {
            adapter,
            dispatcher,
            store,
            failures,
            recorder: Recorder::new(),
        }
    }

    async fn next(&self, queues: &[&str]) -> ControlResult<Option<Disposition>> {
        self.adapter.process_next(self.recorder.clone(), queues).await
    }

    /// Process until no message is eligible
    async fn drain(&self, queues: &[&str]) -> Vec<Disposition> {
        let mut dispositions = Vec::new();
        while let Some(disposition) = self.next(queues).await.unwrap() {
            dispositions.push(disposition);
        }
        dispositions
    }
}

#[derive(Serialize, Deserialize)]
struct SlowReport {
    account: u32,
}

#[async_trait]
impl Job for SlowReport {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "slow_report";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        Ok(builder.unique(|args| args["account"].to_string()))
    }

    async fn execute(&self, ctx: Recorder, _run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        let _permit = ctx
            .gate
            .acquire()
            .await
            .map_err(|_| JobError::permanent("gate closed"))?;
        Ok(Outcome::Success)
    }
}

#[derive(Serialize, Deserialize)]
struct Report {
    account: u32,
}

#[async_trait]
impl Job for Report {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "report";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        Ok(builder.queue("reports").unique(|args| args["account"].to_string()))
    }

    async fn execute(&self, ctx: Recorder, _run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        Ok(Outcome::Success)
    }
}

#[derive(Serialize, Deserialize)]
struct AlwaysTimesOut {
    id: u32,
}

#[async_trait]
impl Job for AlwaysTimesOut {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "always_times_out";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        builder.retries(RetryOptions::new().limit(2).delay(Duration::ZERO))
    }

    async fn execute(&self, ctx: Recorder, run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        Err(JobError::new("TimeoutError", format!("attempt {} timed out", run.attempt)))
    }
}

#[derive(Serialize, Deserialize)]
struct FlakyOnce {
    id: u32,
}

#[async_trait]
impl Job for FlakyOnce {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "flaky_once";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        Ok(builder
            .retries(RetryOptions::new().delay(Duration::ZERO))?
            .unique(|args| args["id"].to_string()))
    }

    async fn execute(&self, ctx: Recorder, run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        if run.attempt == 1 {
            return Err(JobError::new("ConnectionReset", "peer went away"));
        }
        Ok(Outcome::Success)
    }
}

#[derive(Serialize, Deserialize)]
struct EndlessChain {
    id: u32,
}

#[async_trait]
impl Job for EndlessChain {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "endless_chain";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        builder.ordered(
            OrderingOptions::new()
                .max_iterations(3)
                .unique(|args| format!("chain-{}", args["id"])),
        )
    }

    async fn execute(&self, ctx: Recorder, run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        Outcome::continue_with(&json!({"step": run.iteration}))
    }
}

#[derive(Serialize, Deserialize)]
struct GatedChain {
    id: u32,
}

#[async_trait]
impl Job for GatedChain {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "gated_chain";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        builder.ordered(
            OrderingOptions::new()
                .max_iterations(2)
                .unique(|args| format!("gated-{}", args["id"])),
        )
    }

    async fn execute(&self, ctx: Recorder, run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        // one permit per run
        ctx.gate
            .acquire()
            .await
            .map_err(|_| JobError::permanent("gate closed"))?
            .forget();
        Outcome::continue_with(&json!({"step": run.iteration}))
    }
}

#[derive(Serialize, Deserialize)]
struct Paginate {
    pages: u32,
}

#[async_trait]
impl Job for Paginate {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "paginate";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        builder.ordered(OrderingOptions::new().done_when(|carry| carry["remaining"] == json!(0)))
    }

    async fn execute(&self, ctx: Recorder, run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        let fetched: u32 = run.carry_as::<u32>()?.unwrap_or(0) + 1;
        ctx.seen.lock().push(format!("page {}", fetched));
        if fetched == self.pages {
            Outcome::continue_with(&json!({"remaining": 0}))
        } else {
            Outcome::continue_with(&fetched)
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Ticker;

#[async_trait]
impl Job for Ticker {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "ticker";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        builder.continuous(ContinuousOptions::new())
    }

    async fn execute(&self, ctx: Recorder, run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        if run.iteration == 4 {
            Ok(Outcome::Stop)
        } else {
            Ok(Outcome::Success)
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Misdeclared;

#[async_trait]
impl Job for Misdeclared {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "misdeclared";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        builder.unique(|_| "all".to_string()).retries(RetryOptions::new())
    }

    async fn execute(&self, ctx: Recorder, _run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        Ok(Outcome::Success)
    }
}

#[derive(Serialize, Deserialize)]
struct ClassifiedRetry;

#[async_trait]
impl Job for ClassifiedRetry {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "classified_retry";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        builder.retries(
            RetryOptions::new()
                .delay(Duration::from_secs(60))
                .exception_delays([("TimeoutError", Duration::from_secs(5))]),
        )
    }

    async fn execute(&self, ctx: Recorder, _run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        Err(JobError::new("TimeoutError", "upstream too slow"))
    }
}

#[derive(Serialize, Deserialize)]
struct Panicky {
    key: String,
}

#[async_trait]
impl Job for Panicky {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "panicky";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        Ok(builder.unique(|args| args["key"].as_str().unwrap_or_default().to_string()))
    }

    async fn execute(&self, ctx: Recorder, _run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        panic!("body blew up for {}", self.key);
    }
}

#[derive(Serialize, Deserialize)]
struct Mail {
    to: String,
}

#[async_trait]
impl Job for Mail {
    type Context = Recorder;

    const JOB_TYPE: &'static str = "mail";

    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        Ok(builder.queue("mail").prioritized())
    }

    async fn execute(&self, ctx: Recorder, _run: &RunContext) -> Result<Outcome, JobError> {
        ctx.hit();
        ctx.seen.lock().push(self.to.clone());
        Ok(Outcome::Success)
    }
}

/// A1. At Most One Admission Per Fingerprint
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_single_winner() {
    let h = Harness::new();
    h.adapter.register_job::<SlowReport>().unwrap();

    // Arrange: the same fingerprint delivered eight times (at-least-once transport)
    for _ in 0..8 {
        let mut message = JobMessage::new("slow_report", "default", json!({"account": 7}));
        message.fingerprint = Some("7".to_string());
        h.dispatcher.enqueue(message).await.unwrap();
    }

    // Act: eight workers race for the messages
    let mut workers = JoinSet::new();
    for _ in 0..8 {
        let adapter = h.adapter.clone();
        let recorder = h.recorder.clone();
        workers.spawn(async move { adapter.process_next(recorder, &["default"]).await });
    }

    // Assert: seven are rejected while the winner is still running
    for _ in 0..7 {
        let disposition = workers.join_next().await.unwrap().unwrap().unwrap();
        assert!(matches!(disposition, Some(Disposition::AdmissionRejected { .. })));
    }
    h.recorder.started(1).await;
    assert_eq!(h.recorder.runs(), 1);
    assert!(h.store.get("default:7").is_some());

    h.recorder.gate.add_permits(1);
    let winner = workers.join_next().await.unwrap().unwrap().unwrap();
    assert_eq!(winner, Some(Disposition::Completed));
    assert!(h.store.is_empty());
    assert_eq!(h.adapter.observability().metrics().snapshot().rejected, 7);
}

/// A2. Retry Limit Two Means Exactly Three Runs
#[tokio::test]
async fn test_retry_limit_gives_up_on_third_failure() {
    let h = Harness::new();
    h.adapter.register_job::<AlwaysTimesOut>().unwrap();
    h.adapter.enqueue(&AlwaysTimesOut { id: 1 }).await.unwrap();

    // Act
    let dispositions = h.drain(&["default"]).await;

    // Assert
    assert_eq!(
        dispositions,
        vec![
            Disposition::RetryScheduled { next_attempt: 2, delay: Duration::ZERO },
            Disposition::RetryScheduled { next_attempt: 3, delay: Duration::ZERO },
            Disposition::RetriesExhausted { attempts: 3 },
        ]
    );
    assert_eq!(h.recorder.runs(), 3);

    let reports = h.failures.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, FailureKind::RetriesExhausted);
    assert_eq!(reports[0].severity, Severity::Error);
    assert_eq!(reports[0].attempts, 3);
    assert_eq!(reports[0].errors.len(), 3);
    assert!(reports[0].errors.iter().all(|e| e.kind.as_deref() == Some("TimeoutError")));

    // retry-tracking key is gone once the chain gave up
    assert!(h.store.is_empty());
}

/// A3. Retry Keeps The Lock And Tracks The Chain
#[tokio::test]
async fn test_retry_retains_lock_then_releases_on_success() {
    let h = Harness::new();
    h.adapter.register_job::<FlakyOnce>().unwrap();
    h.adapter.enqueue(&FlakyOnce { id: 3 }).await.unwrap();

    // Act: first attempt fails
    let first = h.next(&["default"]).await.unwrap();

    // Assert: lock retained, retry-tracking key written, duplicate enqueue refused
    assert!(matches!(first, Some(Disposition::RetryScheduled { next_attempt: 2, .. })));
    assert!(h.store.get("default:3").is_some());
    assert!(h.store.get("default:retry:3").is_some());
    assert!(h.adapter.enqueue(&FlakyOnce { id: 3 }).await.unwrap().is_duplicate());

    // Act: retry succeeds
    let second = h.next(&["default"]).await.unwrap();
    assert_eq!(second, Some(Disposition::Completed));
    assert!(h.store.is_empty());
    assert_eq!(h.recorder.runs(), 2);
}

/// A4. Ordered Chain Aborts After Its Iteration Budget
#[tokio::test]
async fn test_ordered_chain_aborts_after_three_iterations() {
    let h = Harness::new();
    h.adapter.register_job::<EndlessChain>().unwrap();
    h.adapter.enqueue(&EndlessChain { id: 9 }).await.unwrap();

    // Act: first iteration only
    let first = h.next(&["default"]).await.unwrap();
    assert_eq!(first, Some(Disposition::Continued { iteration: 1 }));
    assert!(h.adapter.is_locked(&EndlessChain { id: 9 }).await.unwrap());
    let pending = h.dispatcher.pending("default");
    assert_eq!(pending[0].fingerprint.as_deref(), Some("chain-9"));
    assert_eq!(pending[0].carry, Some(json!({"step": 0})));

    // Act: the rest of the chain
    let rest = h.drain(&["default"]).await;

    // Assert
    assert_eq!(
        rest,
        vec![
            Disposition::Continued { iteration: 2 },
            Disposition::IterationLimitExceeded { iterations: 3 },
        ]
    );
    assert_eq!(h.recorder.runs(), 3);
    assert_eq!(h.dispatcher.total(), 0);
    assert!(!h.adapter.is_locked(&EndlessChain { id: 9 }).await.unwrap());

    let reports = h.failures.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, FailureKind::IterationLimitExceeded);
    assert_eq!(reports[0].severity, Severity::Critical);
    assert_eq!(reports[0].iteration, 2);
}

/// A5. Done Predicate Ends An Ordered Chain
#[tokio::test]
async fn test_done_predicate_completes_chain() {
    let h = Harness::new();
    h.adapter.register_job::<Paginate>().unwrap();
    h.adapter.enqueue(&Paginate { pages: 4 }).await.unwrap();

    let dispositions = h.drain(&["default"]).await;

    assert_eq!(dispositions.last(), Some(&Disposition::Completed));
    assert_eq!(h.recorder.runs(), 4);
    assert_eq!(
        *h.recorder.seen.lock(),
        vec!["page 1", "page 2", "page 3", "page 4"]
    );
    assert!(h.failures.is_empty());
}

/// A6. Release Then Re-acquire
#[tokio::test]
async fn test_release_then_reacquire_same_fingerprint() {
    let h = Harness::new();
    h.adapter.register_job::<Report>().unwrap();

    // Arrange: a full chain for account 5
    h.adapter.enqueue(&Report { account: 5 }).await.unwrap();
    assert_eq!(h.next(&["reports"]).await.unwrap(), Some(Disposition::Completed));

    // Act: same fingerprint again
    let again = h.adapter.enqueue(&Report { account: 5 }).await.unwrap();

    // Assert: no residual lock
    assert!(again.job_id().is_some());
    assert_eq!(h.next(&["reports"]).await.unwrap(), Some(Disposition::Completed));
    assert_eq!(h.recorder.runs(), 2);
    assert!(h.store.is_empty());
}

/// A7. Continuous Loop Runs Until Stop
#[tokio::test]
async fn test_continuous_stops_on_fifth_run() {
    let h = Harness::new();
    h.adapter.register_job::<Ticker>().unwrap();
    h.adapter.enqueue(&Ticker).await.unwrap();

    let dispositions = h.drain(&["default"]).await;

    assert_eq!(h.recorder.runs(), 5);
    assert_eq!(dispositions.len(), 5);
    assert!(dispositions[..4].iter().all(|d| matches!(d, Disposition::Continued { .. })));
    assert_eq!(dispositions[4], Disposition::Completed);
    assert_eq!(h.adapter.observability().metrics().snapshot().continued, 4);
}

/// A8. Retries After Unique Is Rejected At Registration
#[tokio::test]
async fn test_retries_after_unique_is_configuration_error() {
    let h = Harness::new();

    let result = h.adapter.register_job::<Misdeclared>();

    assert!(matches!(result, Err(ControlError::Configuration(_))));
    assert!(matches!(
        h.adapter.enqueue(&Misdeclared).await,
        Err(ControlError::JobTypeNotRegistered(_))
    ));
    assert_eq!(h.recorder.runs(), 0);
}

/// A9. Classified Delay Overrides The Default
#[tokio::test]
async fn test_timeout_error_uses_classified_delay() {
    let h = Harness::new();
    h.adapter.register_job::<ClassifiedRetry>().unwrap();
    h.adapter.enqueue(&ClassifiedRetry).await.unwrap();

    // Act
    let before = Utc::now();
    let disposition = h.next(&["default"]).await.unwrap();

    // Assert: 5s, not 60s
    assert_eq!(
        disposition,
        Some(Disposition::RetryScheduled { next_attempt: 2, delay: Duration::from_secs(5) })
    );
    let pending = h.dispatcher.pending("default");
    assert_eq!(pending.len(), 1);
    let wait = pending[0].run_at - before;
    assert!(wait >= chrono::Duration::seconds(4) && wait <= chrono::Duration::seconds(6));

    // not eligible yet
    assert_eq!(h.next(&["default"]).await.unwrap(), None);
}

/// A10. Store Outage Aborts Admission Without Side Effects
#[tokio::test]
async fn test_store_unavailable_propagates() {
    let h = Harness::new();
    h.adapter.register_job::<Report>().unwrap();
    h.adapter.enqueue(&Report { account: 1 }).await.unwrap();

    // Arrange
    h.store.set_available(false);

    // Act + Assert: neither enqueue nor admission reads the outage as "unlocked"
    let enqueue = h.adapter.enqueue(&Report { account: 2 }).await;
    assert!(matches!(enqueue, Err(ControlError::StoreUnavailable(_))));

    let admission = h.next(&["reports"]).await;
    assert!(matches!(admission, Err(ControlError::StoreUnavailable(_))));
    assert_eq!(h.recorder.runs(), 0);
    assert_eq!(h.dispatcher.pending("reports").len(), 1);

    // Recovery: the message is still deliverable
    h.store.set_available(true);
    assert_eq!(h.next(&["reports"]).await.unwrap(), Some(Disposition::Completed));
    assert!(h.store.is_empty());
}

/// A11. Panicking Body Still Releases The Lock
#[tokio::test]
async fn test_panic_releases_lock() {
    let h = Harness::new();
    h.adapter.register_job::<Panicky>().unwrap();
    let job = Panicky { key: "k".to_string() };
    h.adapter.enqueue(&job).await.unwrap();

    let disposition = h.next(&["default"]).await.unwrap();

    assert_eq!(disposition, Some(Disposition::Failed));
    assert!(!h.adapter.is_locked(&job).await.unwrap());
    assert!(h.store.is_empty());

    let reports = h.failures.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].errors[0].kind.as_deref(), Some("Panic"));
    assert!(reports[0].errors[0].message.contains("body blew up for k"));
}

/// A12. Priority Queues Drain High To Low
#[tokio::test]
async fn test_priority_routing() {
    let h = Harness::new();
    let descriptor = h.adapter.register_job::<Mail>().unwrap();

    // Arrange: enqueue low first, high last
    h.adapter
        .enqueue_with_priority(&Mail { to: "low".to_string() }, JobPriority::Low)
        .await
        .unwrap();
    h.adapter.enqueue(&Mail { to: "normal".to_string() }).await.unwrap();
    h.adapter
        .enqueue_with_priority(&Mail { to: "high".to_string() }, JobPriority::High)
        .await
        .unwrap();

    assert_eq!(h.dispatcher.pending("mail_low").len(), 1);
    assert_eq!(h.dispatcher.pending("mail_normal").len(), 1);
    assert_eq!(h.dispatcher.pending("mail_high").len(), 1);

    // Act: drain in declared order
    let queues = descriptor.queues();
    let queue_refs: Vec<&str> = queues.iter().map(String::as_str).collect();
    h.drain(&queue_refs).await;

    // Assert
    assert_eq!(*h.recorder.seen.lock(), vec!["high", "normal", "low"]);
}

/// A13. Delayed Enqueue Waits
#[tokio::test]
async fn test_enqueue_in_delays_eligibility() {
    let h = Harness::new();
    h.adapter.register_job::<Report>().unwrap();

    h.adapter
        .enqueue_in(&Report { account: 4 }, Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(h.next(&["reports"]).await.unwrap(), None);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(h.next(&["reports"]).await.unwrap(), Some(Disposition::Completed));
}

/// A14. Workers Share One Dispatcher And Lock Store
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workers_drain_all_queues() {
    let h = Harness::new();
    h.adapter.register_job::<Report>().unwrap();
    h.adapter.register_job::<Ticker>().unwrap();

    for account in 0..10 {
        h.adapter.enqueue(&Report { account }).await.unwrap();
    }
    h.adapter.enqueue(&Ticker).await.unwrap();

    let mut events = h.adapter.event_stream();
    let workers: Vec<_> = (0..3)
        .map(|_| h.adapter.start_workers(h.recorder.clone(), Vec::new()).unwrap())
        .collect();

    // 10 reports and one ticker chain
    let mut terminal = 0;
    while terminal < 11 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for events")
            .unwrap();
        if event.is_terminal() {
            terminal += 1;
        }
    }

    for worker in workers {
        worker.shutdown().await.unwrap();
    }
    assert_eq!(h.recorder.runs(), 15);
    assert_eq!(h.dispatcher.total(), 0);
    assert!(h.store.is_empty());
}

/// A15. Pending Duplicates Are Refused At Enqueue
#[tokio::test]
async fn test_second_pending_enqueue_is_duplicate() {
    let h = Harness::new();
    h.adapter.register_job::<Report>().unwrap();

    // Act: same fingerprint twice before any worker runs
    let first = h.adapter.enqueue(&Report { account: 1 }).await.unwrap();
    let second = h.adapter.enqueue(&Report { account: 1 }).await.unwrap();

    // Assert: the lock is owned from enqueue, only one message is pending
    assert!(first.job_id().is_some());
    assert!(second.is_duplicate());
    assert_eq!(h.store.get("reports:1").as_deref(), first.job_id().map(|id| id.as_str()));
    let pending = h.dispatcher.pending("reports");
    assert_eq!(pending.len(), 1);
    assert!(pending[0].lock_held);

    let dispositions = h.drain(&["reports"]).await;
    assert_eq!(dispositions, vec![Disposition::Completed]);
    assert_eq!(h.recorder.runs(), 1);
    assert!(h.store.is_empty());
    assert_eq!(h.adapter.observability().metrics().snapshot().duplicates, 1);
}

/// A16. A Redelivered Continuation Does Not Run Twice
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_delivery_of_continuation_runs_once() {
    let h = Harness::new();
    h.adapter.register_job::<GatedChain>().unwrap();
    h.adapter.enqueue(&GatedChain { id: 2 }).await.unwrap();

    // Arrange: first hop runs and schedules iteration 1
    h.recorder.gate.add_permits(1);
    assert_eq!(h.next(&["default"]).await.unwrap(), Some(Disposition::Continued { iteration: 1 }));

    // at-least-once transport hands out the continuation twice
    let pending = h.dispatcher.pending("default");
    assert_eq!(pending.len(), 1);
    assert!(pending[0].lock_held);
    h.dispatcher.enqueue(pending[0].clone()).await.unwrap();

    // Act: two workers race for the copies
    let mut workers = JoinSet::new();
    for _ in 0..2 {
        let adapter = h.adapter.clone();
        let recorder = h.recorder.clone();
        workers.spawn(async move { adapter.process_next(recorder, &["default"]).await });
    }

    // Assert: the copy is rejected while the original is still running
    let rejected = workers.join_next().await.unwrap().unwrap().unwrap();
    assert!(matches!(rejected, Some(Disposition::AdmissionRejected { .. })));
    h.recorder.started(2).await;
    assert_eq!(h.recorder.runs(), 2);
    assert!(h.adapter.is_locked(&GatedChain { id: 2 }).await.unwrap());

    h.recorder.gate.add_permits(1);
    let winner = workers.join_next().await.unwrap().unwrap().unwrap();
    assert_eq!(winner, Some(Disposition::IterationLimitExceeded { iterations: 2 }));
    assert_eq!(h.recorder.runs(), 2);
    assert_eq!(h.dispatcher.total(), 0);
    assert!(h.store.is_empty());
    assert_eq!(h.adapter.observability().metrics().snapshot().rejected, 1);
}
