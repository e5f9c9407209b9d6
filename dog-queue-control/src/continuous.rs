//! Continuous loop: re-enqueue after every successful run until the body stops it.

use serde_json::Value;

use crate::{ControlError, ControlResult, job::Outcome};

/// Declared continuous options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinuousOptions {
    max_runs: Option<u32>,
}

impl ContinuousOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optional safety bound on the number of runs
    pub fn max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    pub fn get_max_runs(&self) -> Option<u32> {
        self.max_runs
    }

    pub(crate) fn validate(&self) -> ControlResult<()> {
        if self.max_runs == Some(0) {
            return Err(ControlError::configuration("continuous: max_runs must be at least 1"));
        }
        Ok(())
    }
}

/// What a continuous chain does after a run
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStep {
    /// Re-enqueue as iteration `iteration`, carrying `carry`
    Continue { iteration: u32, carry: Option<Value> },
    /// Body asked to stop
    Stopped,
    /// Safety bound reached
    LimitReached { runs: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct ContinuousLoop {
    options: ContinuousOptions,
}

impl ContinuousLoop {
    pub fn new(options: ContinuousOptions) -> Self {
        Self { options }
    }

    /// Decide after iteration `iteration` (0-based) returned `outcome`
    pub fn advance(&self, iteration: u32, carry: Option<&Value>, outcome: &Outcome) -> LoopStep {
        let runs = iteration.saturating_add(1);
        let carry = match outcome {
            Outcome::Stop => return LoopStep::Stopped,
            Outcome::Success => carry.cloned(),
            Outcome::SuccessContinue(state) => Some(state.clone()),
        };

        match self.options.max_runs {
            Some(max) if runs >= max => LoopStep::LimitReached { runs },
            _ => LoopStep::Continue { iteration: runs, carry },
        }
    }
}
