//! Retry count resolution and linear backoff.
//!
//! A step gets `max_retries + 1` attempts. After failed attempt `n`
//! (0-based) the executor waits `base * (n + 1)` before trying again.

use std::time::Duration;

use super::definition::{StepDefinition, WorkflowDefinition};

/// Resolved retry behaviour for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// `step.retries`, falling back to `workflow.max_retries`, then 0.
    pub fn resolve(
        step: &StepDefinition,
        workflow: &WorkflowDefinition,
        backoff_base: Duration,
    ) -> Self {
        Self {
            max_retries: step.retries.or(workflow.max_retries).unwrap_or(0),
            backoff_base,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a failure on 0-based `attempt` should be followed by another try.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay after failed 0-based `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt.saturating_add(1))
    }
}
