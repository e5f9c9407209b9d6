use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::retry::ExceptionTable;

/// Default TTL of a uniqueness lock
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(24 * 3600);

/// Configuration for the control adapter and its workers
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Sleep between polls when no job is available
    pub poll_interval: Duration,
    /// Sleep after a processing error (e.g. store outage)
    pub error_backoff: Duration,
    /// TTL of uniqueness locks for job types that do not set one
    pub default_lock_ttl: Duration,
    /// Transient error classifications merged into `temporary` retry policies
    pub temporary_exceptions: ExceptionTable,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
            default_lock_ttl: DEFAULT_LOCK_TTL,
            temporary_exceptions: ExceptionTable::defaults(),
        }
    }
}

impl ControlConfig {
    /// Build from `DOG_QUEUE_*` environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let temporary_exceptions = match lookup("DOG_QUEUE_TEMPORARY_EXCEPTIONS") {
            Some(raw) => match ExceptionTable::parse(&raw) {
                Ok(table) => table,
                Err(e) => {
                    warn!("Ignoring DOG_QUEUE_TEMPORARY_EXCEPTIONS: {}", e);
                    defaults.temporary_exceptions.clone()
                }
            },
            None => defaults.temporary_exceptions.clone(),
        };

        Self {
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "DOG_QUEUE_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            error_backoff: Duration::from_millis(parse_or(
                &lookup,
                "DOG_QUEUE_ERROR_BACKOFF_MS",
                defaults.error_backoff.as_millis() as u64,
            )),
            default_lock_ttl: Duration::from_secs(parse_or(
                &lookup,
                "DOG_QUEUE_LOCK_TTL_SECS",
                defaults.default_lock_ttl.as_secs(),
            )),
            temporary_exceptions,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}
