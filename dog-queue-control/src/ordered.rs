//! Ordered executor: a bounded chain of re-enqueued iterations.
//!
//! ```text
//! Running(i) --Success / done predicate--------------> Done
//!            --SuccessContinue, i + 1 < max ----------> Continuing(i + 1)
//!            --SuccessContinue, i + 1 >= max ---------> Aborted(IterationLimitExceeded)
//! ```

use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ControlError, ControlResult, job::Outcome, unique::Uniqueness};

pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Carry-forward state -> chain is complete
pub type DonePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Declared ordering options
#[derive(Clone)]
pub struct OrderingOptions {
    max_iterations: u32,
    done: Option<DonePredicate>,
    uniqueness: Option<Uniqueness>,
}

impl Default for OrderingOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            done: None,
            uniqueness: None,
        }
    }
}

impl OrderingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Force completion when the carried state satisfies `predicate`
    pub fn done_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.done = Some(Arc::new(predicate));
        self
    }

    /// Lock the chain on a fingerprint computed once from the first arguments
    pub fn unique<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.uniqueness = Some(Uniqueness::new(f));
        self
    }

    pub fn uniqueness(&self) -> Option<&Uniqueness> {
        self.uniqueness.as_ref()
    }

    pub fn get_max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub(crate) fn validate(&self) -> ControlResult<()> {
        if self.max_iterations == 0 {
            return Err(ControlError::configuration("ordered: max_iterations must be at least 1"));
        }
        Ok(())
    }
}

impl fmt::Debug for OrderingOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderingOptions")
            .field("max_iterations", &self.max_iterations)
            .field("done", &self.done.is_some())
            .field("uniqueness", &self.uniqueness)
            .finish()
    }
}

/// Position of a chain, threaded through its attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingState {
    pub iteration: u32,
}

impl OrderingState {
    pub fn at(iteration: u32) -> Self {
        Self { iteration }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    IterationLimitExceeded { max_iterations: u32 },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IterationLimitExceeded { max_iterations } => {
                write!(f, "iteration limit of {} exceeded", max_iterations)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderedState {
    Running(u32),
    Continuing(u32),
    Done,
    Aborted(AbortReason),
}

impl OrderedState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted(_))
    }

    /// Ordering state the next attempt should carry, if any
    pub fn ordering_state(&self) -> Option<OrderingState> {
        match self {
            Self::Running(i) | Self::Continuing(i) => Some(OrderingState::at(*i)),
            Self::Done | Self::Aborted(_) => None,
        }
    }
}

/// Transition function of the ordered state machine
#[derive(Debug, Clone, Copy)]
pub struct OrderedExecutor<'a> {
    options: &'a OrderingOptions,
}

impl<'a> OrderedExecutor<'a> {
    pub fn new(options: &'a OrderingOptions) -> Self {
        Self { options }
    }

    pub fn initial() -> OrderedState {
        OrderedState::Running(0)
    }

    /// Next state after the body of iteration `state.iteration` returned `outcome`
    pub fn advance(&self, state: OrderingState, outcome: &Outcome) -> OrderedState {
        match outcome {
            Outcome::Success | Outcome::Stop => OrderedState::Done,
            Outcome::SuccessContinue(carry) => {
                if self.options.done.as_ref().is_some_and(|done| done(carry)) {
                    return OrderedState::Done;
                }

                let next = state.iteration.saturating_add(1);
                if next < self.options.max_iterations {
                    OrderedState::Continuing(next)
                } else {
                    OrderedState::Aborted(AbortReason::IterationLimitExceeded {
                        max_iterations: self.options.max_iterations,
                    })
                }
            }
        }
    }
}
