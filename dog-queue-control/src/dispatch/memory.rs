use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{ControlResult, JobMessage, dispatch::Dispatcher};

type Queues = HashMap<String, VecDeque<JobMessage>>;

/// In-memory FIFO dispatcher for testing and development
#[derive(Clone, Default)]
pub struct MemoryDispatcher {
    queues: Arc<RwLock<Queues>>,
}

impl MemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the messages waiting in `queue`
    pub fn pending(&self, queue: &str) -> Vec<JobMessage> {
        self.queues
            .read()
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of waiting messages across every queue
    pub fn total(&self) -> usize {
        self.queues.read().values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl Dispatcher for MemoryDispatcher {
    async fn enqueue(&self, message: JobMessage) -> ControlResult<()> {
        self.queues
            .write()
            .entry(message.queue.clone())
            .or_default()
            .push_back(message);
        Ok(())
    }

    async fn dequeue(&self, queues: &[&str]) -> ControlResult<Option<JobMessage>> {
        let now = Utc::now();
        let mut all = self.queues.write();

        for queue_name in queues {
            if let Some(queue) = all.get_mut(*queue_name) {
                // delayed messages stay in place, FIFO among eligible ones
                if let Some(index) = queue.iter().position(|m| m.is_eligible(now)) {
                    return Ok(queue.remove(index));
                }
            }
        }
        Ok(None)
    }

    async fn len(&self, queue: &str) -> ControlResult<usize> {
        Ok(self.queues.read().get(queue).map(VecDeque::len).unwrap_or(0))
    }
}
