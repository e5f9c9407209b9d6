pub mod metrics;
pub mod tracing;
pub mod analytics;

pub use metrics::{GlobalMetrics, JobTypeMetrics, LiveMetrics};
pub use analytics::ObservabilityLayer;

#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
