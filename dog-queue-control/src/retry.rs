//! Retry policy: classify a failure, decide retry vs give-up, compute the delay.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use once_cell::sync::Lazy;
use rand::Rng;

use crate::{ControlError, ControlResult, JobError};

pub const DEFAULT_RETRY_LIMIT: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_EXPIRE_RETRY_KEY_AFTER: Duration = Duration::from_secs(3600);

static DEFAULT_TEMPORARY_EXCEPTIONS: Lazy<ExceptionTable> = Lazy::new(|| {
    [
        ("TimeoutError", 10),
        ("ConnectionError", 30),
        ("ConnectionReset", 30),
        ("DeadlockDetected", 5),
        ("StoreUnavailable", 60),
        ("ServiceUnavailable", 60),
    ]
    .into_iter()
    .map(|(kind, secs)| (kind.to_string(), Duration::from_secs(secs)))
    .collect()
});

/// Error classification -> retry delay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionTable(HashMap<String, Duration>);

impl ExceptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide table of transient error classifications
    pub fn defaults() -> Self {
        DEFAULT_TEMPORARY_EXCEPTIONS.clone()
    }

    pub fn insert(&mut self, kind: impl Into<String>, delay: Duration) {
        self.0.insert(kind.into(), delay);
    }

    pub fn get(&self, kind: &str) -> Option<Duration> {
        self.0.get(kind).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse `Kind=seconds,Kind=seconds`
    pub fn parse(spec: &str) -> ControlResult<Self> {
        let mut table = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (kind, secs) = entry.split_once('=').ok_or_else(|| {
                ControlError::configuration(format!("temporary exception '{}' is not Kind=seconds", entry))
            })?;
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ControlError::configuration(format!("temporary exception '{}' has a bad delay", entry))
            })?;
            table.insert(kind.trim(), Duration::from_secs(secs));
        }
        Ok(table)
    }
}

impl FromIterator<(String, Duration)> for ExceptionTable {
    fn from_iter<I: IntoIterator<Item = (String, Duration)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Per-attempt delay computation
pub trait Backoff: Send + Sync + fmt::Debug {
    /// Delay before retry number `attempt` (1-based, the attempt that just failed)
    fn delay(&self, base: Duration, attempt: u32) -> Duration;
}

/// Same delay for every attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantBackoff;

impl Backoff for ConstantBackoff {
    fn delay(&self, base: Duration, _attempt: u32) -> Duration {
        base
    }
}

/// `base * 2^(attempt-1)`, capped at `max`, optionally jittered down to half
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub max: Duration,
    pub jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(max: Duration) -> Self {
        Self { max, jitter: false }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, base: Duration, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let delay = base.checked_mul(factor).unwrap_or(self.max).min(self.max);

        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }
}

/// Declared retry options, resolved into a [`RetryPolicy`] at registration
#[derive(Debug, Clone)]
pub struct RetryOptions {
    limit: u32,
    delay: Duration,
    exceptions: Option<Vec<String>>,
    exception_delays: Option<HashMap<String, Duration>>,
    temporary: bool,
    expire_retry_key_after: Duration,
    backoff: Arc<dyn Backoff>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RETRY_LIMIT,
            delay: DEFAULT_RETRY_DELAY,
            exceptions: None,
            exception_delays: None,
            temporary: false,
            expire_retry_key_after: DEFAULT_EXPIRE_RETRY_KEY_AFTER,
            backoff: Arc::new(ConstantBackoff),
        }
    }
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of retries after the first attempt
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Default delay between attempts
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Retry only these classifications, with the default delay
    pub fn exceptions<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exceptions = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    /// Retry only these classifications, each with its own delay
    pub fn exception_delays<I, S>(mut self, delays: I) -> Self
    where
        I: IntoIterator<Item = (S, Duration)>,
        S: Into<String>,
    {
        self.exception_delays = Some(delays.into_iter().map(|(k, d)| (k.into(), d)).collect());
        self
    }

    /// Also retry the process-wide transient classifications
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// TTL of the retry-tracking key in the lock store
    pub fn expire_retry_key_after(mut self, expire: Duration) -> Self {
        self.expire_retry_key_after = expire;
        self
    }

    pub fn backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Validate and merge with the temporary-exception table
    pub fn resolve(self, temporary_exceptions: &ExceptionTable) -> ControlResult<RetryPolicy> {
        let mut exceptions = match (self.exceptions, self.exception_delays) {
            (Some(_), Some(_)) => {
                return Err(ControlError::configuration(
                    "retries: give either an exception list or an exception delay map, not both",
                ))
            }
            (Some(list), None) => ExceptionPolicy::Listed(list.into_iter().collect()),
            (None, Some(map)) => ExceptionPolicy::Delays(map),
            (None, None) => ExceptionPolicy::Any,
        };

        if self.temporary {
            let mut delays = match exceptions {
                ExceptionPolicy::Any => HashMap::new(),
                ExceptionPolicy::Listed(kinds) => kinds.into_iter().map(|k| (k, self.delay)).collect(),
                ExceptionPolicy::Delays(map) => map,
            };
            // explicit entries win over the defaults
            for (kind, delay) in &temporary_exceptions.0 {
                delays.entry(kind.clone()).or_insert(*delay);
            }
            exceptions = ExceptionPolicy::Delays(delays);
        }

        Ok(RetryPolicy {
            limit: self.limit,
            delay: self.delay,
            exceptions,
            expire_retry_key_after: self.expire_retry_key_after,
            backoff: self.backoff,
        })
    }
}

/// Which failures are retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionPolicy {
    /// Every classified failure, default delay
    Any,
    /// Only listed classifications, default delay
    Listed(HashSet<String>),
    /// Only mapped classifications, mapped delay
    Delays(HashMap<String, Duration>),
}

/// Why a failing chain stops retrying
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiveUpReason {
    LimitReached { attempts: u32, limit: u32 },
    Unlisted { kind: String },
    Permanent,
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitReached { attempts, limit } => {
                write!(f, "retry limit {} reached after {} attempts", limit, attempts)
            }
            Self::Unlisted { kind } => write!(f, "{} is not a retried error", kind),
            Self::Permanent => f.write_str("permanent error"),
        }
    }
}

/// Outcome of a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration, next_attempt: u32 },
    GiveUp(GiveUpReason),
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Resolved, immutable retry policy of a job type
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    limit: u32,
    delay: Duration,
    exceptions: ExceptionPolicy,
    expire_retry_key_after: Duration,
    backoff: Arc<dyn Backoff>,
}

impl RetryPolicy {
    /// Decide what happens after attempt `attempt` (1-based) failed with `error`.
    ///
    /// Retries are granted while `attempt <= limit`, so a job gets at most
    /// `limit + 1` runs.
    pub fn on_failure(&self, attempt: u32, error: &JobError) -> RetryDecision {
        let kind = match error.kind() {
            Some(kind) => kind,
            None => return RetryDecision::GiveUp(GiveUpReason::Permanent),
        };

        if attempt > self.limit {
            return RetryDecision::GiveUp(GiveUpReason::LimitReached {
                attempts: attempt,
                limit: self.limit,
            });
        }

        let base = match &self.exceptions {
            ExceptionPolicy::Any => self.delay,
            ExceptionPolicy::Listed(kinds) if kinds.contains(kind) => self.delay,
            ExceptionPolicy::Delays(delays) => match delays.get(kind) {
                Some(delay) => *delay,
                None => return RetryDecision::GiveUp(GiveUpReason::Unlisted { kind: kind.to_string() }),
            },
            ExceptionPolicy::Listed(_) => {
                return RetryDecision::GiveUp(GiveUpReason::Unlisted { kind: kind.to_string() })
            }
        };

        RetryDecision::Retry {
            delay: self.backoff.delay(base, attempt),
            next_attempt: attempt.saturating_add(1),
        }
    }

    /// Store key tracking a chain's retries
    pub fn retry_key(queue: &str, ident: &str) -> String {
        format!("{}:retry:{}", queue, ident)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn exceptions(&self) -> &ExceptionPolicy {
        &self.exceptions
    }

    pub fn expire_retry_key_after(&self) -> Duration {
        self.expire_retry_key_after
    }
}
