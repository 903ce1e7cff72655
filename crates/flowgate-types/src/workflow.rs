//! Workflow wire types for flowgate.
//!
//! `WorkflowDocument` is the registration input as it appears in JSON or YAML
//! files. The engine converts it into its runtime definition (which can also
//! carry inline actions that have no textual form). This module also holds the
//! read-side types returned by `status` and `list`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Registration document
// ---------------------------------------------------------------------------

/// A workflow as written by its author.
///
/// The registration name is not part of the document; the caller supplies it
/// (the CLI uses the file stem).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered step list. Declaration order is the sequential run order.
    #[serde(default)]
    pub steps: Vec<StepDocument>,
    /// Environment variables applied for the duration of a run.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
    /// What to do after a layer with a failed step.
    #[serde(default)]
    pub on_error: OnErrorPolicy,
    /// Default retry count for steps without their own `retries`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Default run variables, visible to conditions and actions.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
}

/// A single step as written by its author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDocument {
    /// Step name, unique within the workflow.
    pub name: String,
    /// Command line: `<command> [args...]`, split on whitespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Boolean expression over run variables; a false result skips the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Per-step retry override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Advisory hint only; concurrency is decided per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    /// Names of steps that must succeed before this one runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// Workflow-level failure policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnErrorPolicy {
    /// Keep running later layers after a failure.
    #[default]
    Continue,
    /// Abort after the first layer that contains a failure.
    Stop,
    /// Reserved. Accepted but runs like `Continue`.
    Retry,
}

impl fmt::Display for OnErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnErrorPolicy::Continue => write!(f, "continue"),
            OnErrorPolicy::Stop => write!(f, "stop"),
            OnErrorPolicy::Retry => write!(f, "retry"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run state and results
// ---------------------------------------------------------------------------

/// Lifecycle of a single `run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Loading,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Loading => write!(f, "loading"),
            RunState::Running => write!(f, "running"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Boolean outcome of one attempted step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub success: bool,
}

impl StepResult {
    pub fn new(step: impl Into<String>, success: bool) -> Self {
        Self {
            step: step.into(),
            success,
        }
    }
}

/// Answer to a `status` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "results", rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// The workflow has never finished a run in this process.
    NoHistory,
    /// Step outcomes of the most recent run, in completion order.
    Last(Vec<StepResult>),
}

impl WorkflowStatus {
    /// Step outcomes, if any run has been recorded.
    pub fn results(&self) -> Option<&[StepResult]> {
        match self {
            WorkflowStatus::NoHistory => None,
            WorkflowStatus::Last(results) => Some(results),
        }
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// One row of the `list` surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub step_count: usize,
    pub steps: Vec<StepSummary>,
}

/// Per-step annotations shown by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_from_camel_case_json() {
        let json = r#"{
            "description": "build and ship",
            "steps": [
                { "name": "a", "command": "echoA" },
                { "name": "b", "command": "echoB --loud", "dependsOn": ["a"], "timeout": 500 }
            ],
            "environment": { "MODE": "ci" },
            "onError": "stop",
            "maxRetries": 2,
            "variables": { "target": "prod" }
        }"#;
        let doc: WorkflowDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.description.as_deref(), Some("build and ship"));
        assert_eq!(doc.steps.len(), 2);
        assert_eq!(doc.steps[1].depends_on, vec!["a".to_string()]);
        assert_eq!(doc.steps[1].timeout, Some(500));
        assert_eq!(doc.on_error, OnErrorPolicy::Stop);
        assert_eq!(doc.max_retries, Some(2));
        assert_eq!(doc.environment["MODE"], "ci");
        assert_eq!(doc.variables["target"], "prod");
    }

    #[test]
    fn document_defaults() {
        let doc: WorkflowDocument =
            serde_json::from_str(r#"{ "steps": [{ "name": "only" }] }"#).unwrap();
        assert_eq!(doc.on_error, OnErrorPolicy::Continue);
        assert!(doc.max_retries.is_none());
        assert!(doc.environment.is_empty());
        assert!(doc.steps[0].command.is_none());
        assert!(doc.steps[0].depends_on.is_empty());
    }

    #[test]
    fn document_from_yaml() {
        let yaml = r#"
steps:
  - name: fetch
    command: curl -s example.com
    retries: 3
  - name: report
    command: echo done
    dependsOn: [fetch]
    condition: "mode == 'full'"
onError: retry
"#;
        let doc: WorkflowDocument = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(doc.steps[0].retries, Some(3));
        assert_eq!(doc.steps[1].condition.as_deref(), Some("mode == 'full'"));
        assert_eq!(doc.on_error, OnErrorPolicy::Retry);
    }

    #[test]
    fn unknown_on_error_is_rejected() {
        let result: Result<WorkflowDocument, _> =
            serde_json::from_str(r#"{ "steps": [], "onError": "explode" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn status_serializes_with_tag() {
        let status = WorkflowStatus::Last(vec![StepResult::new("a", true)]);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "last");
        assert_eq!(json["results"][0]["step"], "a");

        let none = serde_json::to_value(WorkflowStatus::NoHistory).unwrap();
        assert_eq!(none["status"], "no_history");
        assert!(WorkflowStatus::NoHistory.results().is_none());
    }

    #[test]
    fn display_impls() {
        assert_eq!(OnErrorPolicy::Stop.to_string(), "stop");
        assert_eq!(RunState::Completed.to_string(), "completed");
    }
}
