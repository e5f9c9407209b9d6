pub mod memory;

use async_trait::async_trait;

use crate::{ControlResult, JobMessage};

pub use memory::MemoryDispatcher;

/// Job transport the control layer sits on.
///
/// The dispatcher only moves messages; admission, retries and chain
/// continuation are decided by the adapter before and after each run.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Append a message to `message.queue`
    async fn enqueue(&self, message: JobMessage) -> ControlResult<()>;

    /// Take the first eligible message (`run_at <= now`), trying `queues` in order
    async fn dequeue(&self, queues: &[&str]) -> ControlResult<Option<JobMessage>>;

    /// Number of messages waiting in `queue`, eligible or not
    async fn len(&self, queue: &str) -> ControlResult<usize>;
}
