pub mod registry;

pub use registry::{JobHandler, JobRegistry};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{ControlResult, JobError, JobId, descriptor::DescriptorBuilder};

/// What a job body reports after a successful run
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Finished. Continuous jobs re-enqueue with the same arguments.
    Success,

    /// More work remains; the state is carried to the next iteration
    SuccessContinue(Value),

    /// Finished, and a continuous loop must not run again
    Stop,
}

impl Outcome {
    /// Continue with serializable carry-forward state
    pub fn continue_with<S: Serialize>(state: &S) -> Result<Self, JobError> {
        let value = serde_json::to_value(state)
            .map_err(|e| JobError::permanent(format!("Failed to serialize carry state: {}", e)))?;
        Ok(Self::SuccessContinue(value))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SuccessContinue(_) => "success_continue",
            Self::Stop => "stop",
        }
    }
}

/// Per-attempt information handed to the job body
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: JobId,
    pub queue: String,
    pub attempt: u32,
    pub iteration: u32,
    pub carry: Option<Value>,
}

impl RunContext {
    /// Decode the state carried from the previous iteration
    pub fn carry_as<S: DeserializeOwned>(&self) -> Result<Option<S>, JobError> {
        self.carry
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| JobError::permanent(format!("Failed to decode carry state: {}", e)))
    }

    pub fn is_first_iteration(&self) -> bool {
        self.iteration == 0
    }
}

/// Trait for defining job types run under the control layer.
///
/// The job value itself is the argument list; `configure` is the declarative
/// surface (queue, unique, retries, ordered, continuous, prioritized).
#[async_trait]
pub trait Job: Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Context type passed to job execution
    type Context: Send + Sync + Clone + 'static;

    /// Job type identifier for dispatch
    const JOB_TYPE: &'static str;

    /// Declare the job type's capabilities
    fn configure(builder: DescriptorBuilder) -> ControlResult<DescriptorBuilder> {
        Ok(builder)
    }

    /// Execute one attempt
    async fn execute(&self, ctx: Self::Context, run: &RunContext) -> Result<Outcome, JobError>;
}
