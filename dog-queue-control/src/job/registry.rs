use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;

use crate::{
    ControlError, ControlResult, Job, JobError, JobMessage,
    config::ControlConfig,
    descriptor::{DescriptorBuilder, JobDescriptor},
    job::{Outcome, RunContext},
};

/// Type-erased job handler for runtime dispatch
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt of the message's job body
    async fn execute(
        &self,
        message: &JobMessage,
        context: Arc<dyn Any + Send + Sync>,
    ) -> Result<Outcome, JobError>;

    /// Get the job type this handler processes
    fn job_type(&self) -> &'static str;
}

struct ConcreteJobHandler<J: Job> {
    _phantom: std::marker::PhantomData<J>,
}

impl<J: Job> ConcreteJobHandler<J> {
    fn new() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<J: Job> JobHandler for ConcreteJobHandler<J> {
    async fn execute(
        &self,
        message: &JobMessage,
        context: Arc<dyn Any + Send + Sync>,
    ) -> Result<Outcome, JobError> {
        let job: J = serde_json::from_value(message.args.clone())
            .map_err(|e| JobError::permanent(format!("Failed to deserialize job: {}", e)))?;

        let typed_context = context
            .downcast_ref::<J::Context>()
            .ok_or_else(|| JobError::permanent("Invalid context type"))?
            .clone();

        let run = RunContext {
            job_id: message.job_id.clone(),
            queue: message.queue.clone(),
            attempt: message.attempt,
            iteration: message.iteration,
            carry: message.carry.clone(),
        };

        job.execute(typed_context, &run).await
    }

    fn job_type(&self) -> &'static str {
        J::JOB_TYPE
    }
}

/// A registered job type: its resolved descriptor and its handler
#[derive(Clone)]
pub struct RegisteredJob {
    pub descriptor: Arc<JobDescriptor>,
    pub handler: Arc<dyn JobHandler>,
}

/// Registry of job types, their descriptors and handlers
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, RegisteredJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job type.
    ///
    /// Runs the type's declarations; any conflict surfaces here, never at run time.
    pub fn register<J: Job>(&mut self, config: &ControlConfig) -> ControlResult<Arc<JobDescriptor>> {
        if self.jobs.contains_key(J::JOB_TYPE) {
            return Err(ControlError::configuration(format!(
                "Job type '{}' already registered",
                J::JOB_TYPE
            )));
        }

        let descriptor = Arc::new(J::configure(DescriptorBuilder::new(J::JOB_TYPE))?.build_with(config)?);
        self.jobs.insert(
            J::JOB_TYPE.to_string(),
            RegisteredJob {
                descriptor: descriptor.clone(),
                handler: Arc::new(ConcreteJobHandler::<J>::new()),
            },
        );
        Ok(descriptor)
    }

    pub fn get(&self, job_type: &str) -> ControlResult<&RegisteredJob> {
        self.jobs
            .get(job_type)
            .ok_or_else(|| ControlError::JobTypeNotRegistered(job_type.to_string()))
    }

    pub fn descriptor(&self, job_type: &str) -> ControlResult<Arc<JobDescriptor>> {
        self.get(job_type).map(|job| job.descriptor.clone())
    }

    /// Check if a job type is registered
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.jobs.contains_key(job_type)
    }

    /// Get all registered job types
    pub fn registered_types(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// Every physical queue of every registered type, priority queues in drain order
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = Vec::new();
        let mut types: Vec<&RegisteredJob> = self.jobs.values().collect();
        types.sort_by(|a, b| a.descriptor.job_type().cmp(b.descriptor.job_type()));
        for job in types {
            for queue in job.descriptor.queues() {
                if !queues.contains(&queue) {
                    queues.push(queue);
                }
            }
        }
        queues
    }
}
