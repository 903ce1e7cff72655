//! Workflow engine: registration, runs, status, and listing.
//!
//! A run moves through `Idle -> Loading -> Running -> {Completed, Failed}`.
//! Steps execute layer by layer: dependency layers when running in parallel
//! (each layer spawned on a `JoinSet`), or one step per layer in declaration
//! order otherwise. After each layer the `on_error` policy decides whether the
//! run continues.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use flowgate_types::config::EngineConfig;
use flowgate_types::workflow::{
    OnErrorPolicy, RunState, StepResult, WorkflowDocument, WorkflowStatus, WorkflowSummary,
};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::action::BoxCommandExecutor;
use super::context::{ExecutionContext, parse_variable_overrides};
use super::dag::{build_execution_plan, sequential_plan};
use super::definition::{WorkflowDefinition, WorkflowError};
use super::env_scope::EnvScope;
use super::executor::{StepExecutor, StepReport};
use super::store::{DefinitionStore, ResultStore};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by `WorkflowEngine::run`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("invalid variables JSON: {0}")]
    InvalidVariablesJson(String),

    /// Raised only under the `stop` policy.
    #[error("workflow '{workflow}' stopped after failed step(s): {}", .failed_steps.join(", "))]
    WorkflowExecution {
        workflow: String,
        failed_steps: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Summary of a run that reached `Completed`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workflow: String,
    pub run_id: Uuid,
    pub state: RunState,
    /// Step outcomes in completion order.
    pub results: Vec<StepResult>,
    /// Steps that ended `false` (only possible under `continue`).
    pub failed_steps: Vec<String>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failed_steps.is_empty()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

// ---------------------------------------------------------------------------
// Current-workflow marker
// ---------------------------------------------------------------------------

/// Sets the advisory current-workflow marker and clears it on drop.
struct CurrentWorkflowGuard<'a> {
    slot: &'a Mutex<Option<String>>,
    name: String,
}

impl<'a> CurrentWorkflowGuard<'a> {
    fn set(slot: &'a Mutex<Option<String>>, name: &str) -> Self {
        let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(other) = current.as_deref() {
            tracing::warn!(
                workflow = %name,
                running = %other,
                "another workflow is already marked as running"
            );
        }
        *current = Some(name.to_string());
        Self {
            slot,
            name: name.to_string(),
        }
    }
}

impl Drop for CurrentWorkflowGuard<'_> {
    fn drop(&mut self) {
        let mut current = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() == Some(self.name.as_str()) {
            *current = None;
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Registers workflows and runs them through the step executor.
pub struct WorkflowEngine {
    definitions: DefinitionStore,
    results: ResultStore,
    executor: Arc<StepExecutor>,
    current: Mutex<Option<String>>,
}

impl WorkflowEngine {
    pub fn new(commands: BoxCommandExecutor, config: &EngineConfig) -> Self {
        Self {
            definitions: DefinitionStore::new(),
            results: ResultStore::new(),
            executor: Arc::new(StepExecutor::new(
                commands,
                Duration::from_millis(config.backoff_base_ms),
            )),
            current: Mutex::new(None),
        }
    }

    pub fn register(
        &self,
        name: &str,
        definition: WorkflowDefinition,
    ) -> Result<(), WorkflowError> {
        let definition = self.definitions.register(name, definition)?;
        tracing::info!(
            workflow = %name,
            steps = definition.steps.len(),
            on_error = %definition.on_error,
            "workflow registered"
        );
        Ok(())
    }

    /// Convert a JSON/YAML document and register it.
    pub fn register_document(
        &self,
        name: &str,
        document: WorkflowDocument,
    ) -> Result<(), WorkflowError> {
        self.register(name, WorkflowDefinition::from_document(document)?)
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(name)
    }

    /// Summaries of all registered workflows, sorted by name.
    pub fn list(&self) -> Vec<WorkflowSummary> {
        self.definitions
            .list()
            .iter()
            .map(|d| d.summary())
            .collect()
    }

    /// Outcomes of the last completed run of `name`.
    pub fn status(&self, name: &str) -> WorkflowStatus {
        self.results.status(name)
    }

    /// The workflow most recently marked as running, if any.
    pub fn current_workflow(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run a registered workflow.
    ///
    /// `variables` is an optional JSON object overlaid on the workflow's
    /// default variables. With `parallel`, independent steps of a dependency
    /// layer run concurrently; otherwise steps run one at a time in
    /// declaration order.
    ///
    /// Step failures are absorbed into the results. Under the `stop` policy
    /// the run ends after the first layer with a failure and returns
    /// `EngineError::WorkflowExecution`; the partial results are still
    /// recorded.
    pub async fn run(
        &self,
        name: &str,
        variables: Option<&str>,
        parallel: bool,
    ) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let mut state = RunState::Idle;

        transition(name, &mut state, RunState::Loading);
        let definition = self
            .definitions
            .get(name)
            .ok_or_else(|| EngineError::WorkflowNotFound(name.to_string()))?;

        let overrides = match variables {
            Some(json) => {
                parse_variable_overrides(json).map_err(EngineError::InvalidVariablesJson)?
            }
            None => HashMap::new(),
        };

        if definition.on_error == OnErrorPolicy::Retry {
            tracing::warn!(
                workflow = %name,
                "onError 'retry' is reserved and behaves like 'continue'"
            );
        }

        let mut ctx = ExecutionContext::new(&definition, overrides);
        let _marker = CurrentWorkflowGuard::set(&self.current, name);
        let mut env = EnvScope::enter(&definition.environment);

        transition(name, &mut state, RunState::Running);
        tracing::info!(
            workflow = %name,
            run_id = %ctx.run_id,
            parallel,
            steps = definition.steps.len(),
            "workflow started"
        );

        let plan = if parallel {
            match build_execution_plan(&definition.steps) {
                Ok(plan) => plan,
                Err(e) => {
                    env.exit();
                    transition(name, &mut state, RunState::Failed);
                    tracing::error!(
                        workflow = %name,
                        run_id = %ctx.run_id,
                        error = %e,
                        "workflow failed"
                    );
                    return Err(e.into());
                }
            }
        } else {
            sequential_plan(&definition.steps)
        };

        let mut aborted = false;
        for (index, layer) in plan.iter().enumerate() {
            let snapshot = ctx.snapshot();
            tracing::debug!(
                workflow = %name,
                layer = index,
                steps = layer.len(),
                "executing layer"
            );

            let mut layer_failed = false;
            let mut absorb = |ctx: &mut ExecutionContext, report: StepReport| {
                ctx.retry_count += report.retries();
                layer_failed |= !report.success;
                ctx.record(report.to_result());
            };

            if parallel && layer.len() > 1 {
                let mut join_set = JoinSet::new();
                for step in layer {
                    let step = (*step).clone();
                    let workflow = Arc::clone(&definition);
                    let executor = Arc::clone(&self.executor);
                    let snapshot = snapshot.clone();
                    join_set.spawn(async move { executor.execute(&step, &workflow, &snapshot).await });
                }

                let mut pending: HashSet<&str> = layer.iter().map(|s| s.name.as_str()).collect();
                while let Some(joined) = join_set.join_next().await {
                    match joined {
                        Ok(report) => {
                            pending.remove(report.step.as_str());
                            absorb(&mut ctx, report);
                        }
                        Err(e) => {
                            tracing::error!(workflow = %name, error = %e, "step task failed to join");
                        }
                    }
                }

                // A step whose task vanished is recorded as failed.
                for step in layer.iter().filter(|s| pending.contains(s.name.as_str())) {
                    tracing::error!(workflow = %name, step = %step.name, "step produced no result");
                    absorb(&mut ctx, StepReport {
                        step: step.name.clone(),
                        success: false,
                        skipped: false,
                        attempts: 0,
                        failure: None,
                    });
                }
            } else {
                for step in layer {
                    let report = self.executor.execute(step, &definition, &snapshot).await;
                    absorb(&mut ctx, report);
                }
            }

            if layer_failed && definition.on_error == OnErrorPolicy::Stop {
                tracing::error!(
                    workflow = %name,
                    layer = index,
                    "step failed under 'stop' policy, aborting remaining layers"
                );
                aborted = true;
                break;
            }
        }

        env.exit();

        let failed_steps = ctx.failed_steps();
        let run_id = ctx.run_id;
        let started_at = ctx.started_at;
        let retry_count = ctx.retry_count;
        let results = ctx.into_results();
        self.results.record(name, results.clone());

        if aborted {
            transition(name, &mut state, RunState::Failed);
            tracing::error!(
                workflow = %name,
                run_id = %run_id,
                failed = ?failed_steps,
                "workflow failed"
            );
            return Err(EngineError::WorkflowExecution {
                workflow: name.to_string(),
                failed_steps,
            });
        }

        transition(name, &mut state, RunState::Completed);
        let elapsed = started.elapsed();
        tracing::info!(
            workflow = %name,
            run_id = %run_id,
            steps = results.len(),
            failed = failed_steps.len(),
            retries = retry_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "workflow completed"
        );

        Ok(RunReport {
            workflow: name.to_string(),
            run_id,
            state,
            results,
            failed_steps,
            retry_count,
            started_at,
            elapsed,
        })
    }
}

fn transition(workflow: &str, state: &mut RunState, next: RunState) {
    tracing::debug!(%workflow, from = %state, to = %next, "run state transition");
    *state = next;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
