use serde::{Deserialize, Serialize};

/// Priority level chosen at enqueue time for prioritized job types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobPriority {
    /// Drained last
    Low = 1,

    /// Default level
    Normal = 2,

    /// Drained first
    High = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    /// All levels in drain order (high to low)
    pub fn drain_order() -> &'static [JobPriority] {
        &[Self::High, Self::Normal, Self::Low]
    }

    /// Get human-readable name, also used as the queue suffix
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" | "default" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Maps a prioritized job's declared queue to priority-tagged queue names.
///
/// Only the mapping lives here. Draining `queues_for(base)` in the returned
/// order is what turns the mapping into priority scheduling, and that is the
/// dispatcher's job.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrioritySelector;

impl PrioritySelector {
    /// Queue a job of the given base queue should be routed to
    pub fn queue_for(base: &str, priority: JobPriority) -> String {
        format!("{}_{}", base, priority.name())
    }

    /// Priority queues of `base`, highest first
    pub fn queues_for(base: &str) -> Vec<String> {
        JobPriority::drain_order()
            .iter()
            .map(|p| Self::queue_for(base, *p))
            .collect()
    }
}
