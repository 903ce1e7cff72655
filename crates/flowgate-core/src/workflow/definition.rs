//! Workflow definitions: runtime model, validation, parsing, and discovery.
//!
//! Converts between `WorkflowDocument` (JSON/YAML wire form) and the runtime
//! `WorkflowDefinition`, validates structural constraints (non-empty step
//! list, unique step names, known dependencies, settable environment keys),
//! and discovers workflow files on disk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flowgate_types::workflow::{
    OnErrorPolicy, StepDocument, StepSummary, WorkflowDocument, WorkflowSummary,
};
use thiserror::Error;

use super::action::{InlineAction, InlineHandle, NamedCommand, StepAction};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while defining, registering, or planning a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure, or a document that cannot become a definition.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A workflow with this name is already registered.
    #[error("workflow '{0}' is already registered")]
    DuplicateWorkflowName(String),

    /// The workflow has no steps.
    #[error("workflow '{0}' has no steps")]
    EmptyStepList(String),

    /// Two steps share a name.
    #[error("duplicate step name: '{0}'")]
    DuplicateStepName(String),

    /// A step references a dependency that is not part of the workflow.
    #[error("unknown dependency: step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// An environment override cannot be applied to the process table.
    #[error("invalid environment variable name: '{0}'")]
    InvalidEnvironmentKey(String),

    /// Dependency graph contains a cycle.
    #[error("cycle detected involving step '{0}'")]
    CycleDetected(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Runtime model
// ---------------------------------------------------------------------------

/// A registered workflow.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    /// Registration name; injected by the definition store.
    pub name: String,
    pub description: Option<String>,
    /// Steps in declaration order.
    pub steps: Vec<StepDefinition>,
    /// Environment variables applied for the duration of a run.
    pub environment: HashMap<String, String>,
    pub on_error: OnErrorPolicy,
    /// Default retry count for steps without their own `retries`.
    pub max_retries: Option<u32>,
    /// Default run variables.
    pub variables: HashMap<String, String>,
}

impl WorkflowDefinition {
    pub fn new(steps: Vec<StepDefinition>) -> Self {
        Self {
            name: String::new(),
            description: None,
            steps,
            environment: HashMap::new(),
            on_error: OnErrorPolicy::default(),
            max_retries: None,
            variables: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_on_error(mut self, policy: OnErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Convert a wire document into a runtime definition.
    ///
    /// The name stays empty until the definition is registered.
    pub fn from_document(doc: WorkflowDocument) -> Result<Self, WorkflowError> {
        let steps = doc
            .steps
            .into_iter()
            .map(StepDefinition::from_document)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: String::new(),
            description: doc.description,
            steps,
            environment: doc.environment,
            on_error: doc.on_error,
            max_retries: doc.max_retries,
            variables: doc.variables,
        })
    }

    /// Listing row: name, description, and per-step annotations.
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            step_count: self.steps.len(),
            steps: self
                .steps
                .iter()
                .map(|s| StepSummary {
                    name: s.name.clone(),
                    parallel: s.parallel,
                    depends_on: s.depends_on.clone(),
                })
                .collect(),
        }
    }
}

/// A single step of a registered workflow.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub name: String,
    pub action: StepAction,
    /// Boolean expression over run variables; false skips the step.
    pub condition: Option<String>,
    /// Overrides the workflow's `max_retries`.
    pub retries: Option<u32>,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Advisory only; concurrency is chosen per run.
    pub parallel: Option<bool>,
    /// Steps that must have succeeded before this one runs.
    pub depends_on: Vec<String>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            condition: None,
            retries: None,
            timeout: None,
            parallel: None,
            depends_on: Vec::new(),
        }
    }

    /// A step that runs a named command through the command executor.
    pub fn command(name: impl Into<String>, command: NamedCommand) -> Self {
        Self::new(name, StepAction::Command(command))
    }

    /// A step that invokes an inline action directly.
    pub fn inline<A: InlineAction + 'static>(name: impl Into<String>, action: A) -> Self {
        Self::new(name, StepAction::Inline(InlineHandle::new(action)))
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_parallel_hint(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    fn from_document(doc: StepDocument) -> Result<Self, WorkflowError> {
        let command = doc
            .command
            .as_deref()
            .and_then(NamedCommand::parse)
            .ok_or_else(|| {
                WorkflowError::ParseError(format!("step '{}' has no command", doc.name))
            })?;

        Ok(Self {
            name: doc.name,
            action: StepAction::Command(command),
            condition: doc.condition,
            retries: doc.retries,
            timeout: doc.timeout.map(Duration::from_millis),
            parallel: doc.parallel,
            depends_on: doc.depends_on,
        })
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a `WorkflowDocument`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDocument, WorkflowError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Parse a JSON string into a `WorkflowDocument`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDocument, WorkflowError> {
    serde_json::from_str(json).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - At least one step exists
/// - All step names are unique
/// - All `depends_on` references point to existing steps
/// - Environment keys can be set on the process (non-empty, no `=` or NUL)
///
/// Cycles are not rejected here; they surface when a parallel run plans its
/// layers.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.steps.is_empty() {
        return Err(WorkflowError::EmptyStepList(def.name.clone()));
    }

    let mut seen = HashSet::new();
    for step in &def.steps {
        if !seen.insert(step.name.as_str()) {
            return Err(WorkflowError::DuplicateStepName(step.name.clone()));
        }
    }

    for step in &def.steps {
        for dep in &step.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(WorkflowError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    for (key, value) in &def.environment {
        if !is_settable_env(key, value) {
            return Err(WorkflowError::InvalidEnvironmentKey(key.clone()));
        }
    }

    Ok(())
}

/// Whether `std::env::set_var` accepts this pair without panicking.
pub(crate) fn is_settable_env(key: &str, value: &str) -> bool {
    !key.is_empty() && !key.contains('=') && !key.contains('\0') && !value.contains('\0')
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// A workflow document found on disk.
#[derive(Debug, Clone)]
pub struct DiscoveredWorkflow {
    /// Registration name (the file stem).
    pub name: String,
    pub path: PathBuf,
    pub document: WorkflowDocument,
}

/// Load a workflow document from a `.yaml`, `.yml`, or `.json` file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDocument, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_workflow_json(&content),
        _ => parse_workflow_yaml(&content),
    }
}

/// Discover all workflow documents under `base_dir`, sorted by path.
///
/// Scans recursively for `.yaml`, `.yml`, and `.json` files. Files that fail
/// to parse are skipped with a warning.
pub fn discover_workflows(base_dir: &Path) -> Result<Vec<DiscoveredWorkflow>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<DiscoveredWorkflow>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }

        let is_workflow = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml" | "json")
        );
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };
        if !is_workflow {
            continue;
        }

        match load_workflow_file(&path) {
            Ok(document) => results.push(DiscoveredWorkflow {
                name,
                path,
                document,
            }),
            Err(e) => {
                tracing::warn!(?path, error = %e, "skipping unparseable workflow file");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
