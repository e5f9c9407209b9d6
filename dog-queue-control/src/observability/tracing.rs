//! Subscriber setup for binaries embedding the control layer.
//!
//! The library itself only emits `tracing` events and spans.

/// Install a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already set.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing(json: bool) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

/// Span field names shared by every control-layer span
pub mod fields {
    pub const JOB_ID: &str = "job_id";
    pub const JOB_TYPE: &str = "job_type";
    pub const QUEUE: &str = "queue";
    pub const LOCK_KEY: &str = "lock_key";
}
