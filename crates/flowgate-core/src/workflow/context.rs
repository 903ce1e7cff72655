//! Per-run execution context.
//!
//! `ExecutionContext` is owned by a single `run` call. It carries the merged
//! run variables and accumulates step results in completion order. Steps see
//! a read-only `RunSnapshot` taken at the start of each layer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowgate_types::workflow::StepResult;
use serde_json::Value;
use uuid::Uuid;

use super::definition::WorkflowDefinition;

/// Mutable state of one workflow run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub workflow_name: String,
    /// Workflow defaults overlaid with caller overrides.
    pub variables: Arc<HashMap<String, String>>,
    pub started_at: DateTime<Utc>,
    step_results: Vec<StepResult>,
    /// Total retries performed across all steps.
    pub retry_count: u32,
}

impl ExecutionContext {
    pub fn new(definition: &WorkflowDefinition, overrides: HashMap<String, String>) -> Self {
        let mut variables = definition.variables.clone();
        variables.extend(overrides);

        Self {
            run_id: Uuid::now_v7(),
            workflow_name: definition.name.clone(),
            variables: Arc::new(variables),
            started_at: Utc::now(),
            step_results: Vec::new(),
            retry_count: 0,
        }
    }

    pub fn record(&mut self, result: StepResult) {
        self.step_results.push(result);
    }

    pub fn results(&self) -> &[StepResult] {
        &self.step_results
    }

    pub fn into_results(self) -> Vec<StepResult> {
        self.step_results
    }

    /// Outcome of the most recent result recorded for `step`.
    pub fn outcome(&self, step: &str) -> Option<bool> {
        self.step_results
            .iter()
            .rev()
            .find(|r| r.step == step)
            .map(|r| r.success)
    }

    /// Names of steps recorded as failed, in completion order.
    pub fn failed_steps(&self) -> Vec<String> {
        self.step_results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.step.clone())
            .collect()
    }

    /// Read-only view handed to the steps of one layer.
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            workflow: self.workflow_name.clone(),
            variables: Arc::clone(&self.variables),
            outcomes: Arc::new(
                self.step_results
                    .iter()
                    .map(|r| (r.step.clone(), r.success))
                    .collect(),
            ),
        }
    }
}

/// What a step can see of the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub workflow: String,
    pub variables: Arc<HashMap<String, String>>,
    outcomes: Arc<HashMap<String, bool>>,
}

impl RunSnapshot {
    pub fn outcome(&self, step: &str) -> Option<bool> {
        self.outcomes.get(step).copied()
    }

    /// Whether `step` has a recorded `true` result.
    pub fn succeeded(&self, step: &str) -> bool {
        self.outcome(step) == Some(true)
    }
}

/// Parse a caller's JSON variable overrides.
///
/// The input must be a JSON object. String values are kept as-is, numbers and
/// booleans are stringified; any other value is rejected.
pub fn parse_variable_overrides(json: &str) -> Result<HashMap<String, String>, String> {
    let value: Value = serde_json::from_str(json).map_err(|e| e.to_string())?;
    let Value::Object(map) = value else {
        return Err("variables must be a JSON object".to_string());
    };

    map.into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(format!(
                        "variable '{key}' must be a string, number, or boolean, got {other}"
                    ));
                }
            };
            Ok((key, text))
        })
        .collect()
}
