//! Single-step executor: condition gate, dependency check, retry loop, timeout.
//!
//! Every attempt runs the step's action as its own tokio task. With a timeout
//! the executor stops waiting when the timer fires and reports
//! `ActionTimedOut`; the task itself is detached, not aborted, and its result
//! is discarded. A panicking action is reported as `ActionThrew`.

use std::sync::Arc;
use std::time::Duration;

use flowgate_types::workflow::StepResult;

use super::action::{ActionContext, BoxCommandExecutor};
use super::context::RunSnapshot;
use super::definition::{StepDefinition, WorkflowDefinition};
use super::expression::ConditionEvaluator;
use super::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a step ended in failure. Absorbed into a `false` outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepFailure {
    /// The action returned an error or panicked.
    #[error("action failed: {0}")]
    ActionThrew(String),

    /// The action did not finish within the step timeout.
    #[error("action timed out after {}ms", .0.as_millis())]
    ActionTimedOut(Duration),

    /// A dependency has no successful result in this run.
    #[error("dependency '{0}' not satisfied")]
    DependencyNotSatisfied(String),
}

/// Outcome of executing one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: String,
    pub success: bool,
    /// The condition was false (or failed to evaluate) and the action never ran.
    pub skipped: bool,
    /// Number of times the action was started.
    pub attempts: u32,
    /// Last failure, when `success` is false.
    pub failure: Option<StepFailure>,
}

impl StepReport {
    fn skipped(step: &str) -> Self {
        Self {
            step: step.to_string(),
            success: true,
            skipped: true,
            attempts: 0,
            failure: None,
        }
    }

    fn succeeded(step: &str, attempts: u32) -> Self {
        Self {
            step: step.to_string(),
            success: true,
            skipped: false,
            attempts,
            failure: None,
        }
    }

    fn failed(step: &str, attempts: u32, failure: StepFailure) -> Self {
        Self {
            step: step.to_string(),
            success: false,
            skipped: false,
            attempts,
            failure: Some(failure),
        }
    }

    /// Retries performed (attempts beyond the first).
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn to_result(&self) -> StepResult {
        StepResult::new(self.step.clone(), self.success)
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Runs one step to a boolean outcome.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    commands: BoxCommandExecutor,
    evaluator: ConditionEvaluator,
    backoff_base: Duration,
}

impl StepExecutor {
    pub fn new(commands: BoxCommandExecutor, backoff_base: Duration) -> Self {
        Self {
            commands,
            evaluator: ConditionEvaluator::new(),
            backoff_base,
        }
    }

    /// Execute `step` of `workflow` against the results recorded so far.
    ///
    /// 1. A false or unevaluable condition skips the step (success, no action).
    /// 2. Every dependency must have succeeded; otherwise fail without retrying.
    /// 3. Run the action up to `max_retries + 1` times with linear backoff.
    pub async fn execute(
        &self,
        step: &StepDefinition,
        workflow: &WorkflowDefinition,
        snapshot: &RunSnapshot,
    ) -> StepReport {
        if let Some(condition) = &step.condition {
            if !self.evaluator.evaluate_or_skip(condition, &snapshot.variables) {
                tracing::info!(
                    workflow = %snapshot.workflow,
                    step = %step.name,
                    %condition,
                    "condition not met, skipping step"
                );
                return StepReport::skipped(&step.name);
            }
        }

        if let Some(dep) = step.depends_on.iter().find(|d| !snapshot.succeeded(d)) {
            tracing::warn!(
                workflow = %snapshot.workflow,
                step = %step.name,
                dependency = %dep,
                "dependency not satisfied"
            );
            return StepReport::failed(
                &step.name,
                0,
                StepFailure::DependencyNotSatisfied(dep.clone()),
            );
        }

        let policy = RetryPolicy::resolve(step, workflow, self.backoff_base);
        let mut attempt = 0;
        loop {
            let failure = match self.attempt(step, snapshot).await {
                Ok(()) => {
                    tracing::debug!(
                        workflow = %snapshot.workflow,
                        step = %step.name,
                        attempts = attempt + 1,
                        "step succeeded"
                    );
                    return StepReport::succeeded(&step.name, attempt + 1);
                }
                Err(failure) => failure,
            };

            if !policy.should_retry(attempt) {
                tracing::error!(
                    workflow = %snapshot.workflow,
                    step = %step.name,
                    attempts = attempt + 1,
                    error = %failure,
                    "step failed"
                );
                return StepReport::failed(&step.name, attempt + 1, failure);
            }

            let delay = policy.backoff(attempt);
            tracing::warn!(
                workflow = %snapshot.workflow,
                step = %step.name,
                attempt = attempt + 1,
                max_attempts = policy.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "step attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        step: &StepDefinition,
        snapshot: &RunSnapshot,
    ) -> Result<(), StepFailure> {
        let context = ActionContext {
            workflow: snapshot.workflow.clone(),
            step: step.name.clone(),
            variables: Arc::clone(&snapshot.variables),
            host: self.commands.clone(),
        };
        let task = tokio::spawn(step.action.invoke(context));

        let joined = match step.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_elapsed) => {
                    // Dropping the JoinHandle detaches the task; it keeps running.
                    tracing::warn!(
                        workflow = %snapshot.workflow,
                        step = %step.name,
                        timeout_ms = limit.as_millis() as u64,
                        "step attempt timed out"
                    );
                    return Err(StepFailure::ActionTimedOut(limit));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StepFailure::ActionThrew(e.to_string())),
            Err(join_err) if join_err.is_panic() => {
                Err(StepFailure::ActionThrew("action panicked".to_string()))
            }
            Err(join_err) => Err(StepFailure::ActionThrew(join_err.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use crate::workflow::action::{ActionError, NamedCommand};
    use crate::workflow::context::ExecutionContext;
    use crate::workflow::test_support::{counting_fail, counting_ok, flaky, registry, slow};

    fn executor(base_ms: u64) -> StepExecutor {
        let (_registry, commands) = registry();
        StepExecutor::new(commands, Duration::from_millis(base_ms))
    }

    fn workflow(steps: Vec<StepDefinition>) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new(steps).with_variable("mode", "full");
        def.name = "wf".to_string();
        def
    }

    fn snapshot(def: &WorkflowDefinition, done: &[(&str, bool)]) -> RunSnapshot {
        let mut ctx = ExecutionContext::new(def, HashMap::new());
        for (step, success) in done {
            ctx.record(StepResult::new(*step, *success));
        }
        ctx.snapshot()
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let step = StepDefinition::inline("a", counting_ok(&calls));
        let def = workflow(vec![step.clone()]);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(report.success);
        assert!(!report.skipped);
        assert_eq!(report.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_failing_step_runs_retries_plus_one_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let step = StepDefinition::inline("a", counting_fail(&calls)).with_retries(2);
        let def = workflow(vec![step.clone()]);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(!report.success);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.retries(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            report.failure,
            Some(StepFailure::ActionThrew("boom".to_string()))
        );
    }

    #[tokio::test]
    async fn workflow_max_retries_applies_when_step_has_none() {
        let calls = Arc::new(AtomicU32::new(0));
        let step = StepDefinition::inline("a", counting_fail(&calls));
        let def = workflow(vec![step.clone()]).with_max_retries(1);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(!report.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn flaky_step_recovers_within_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let step = StepDefinition::inline("a", flaky(&calls, 2)).with_retries(3);
        let def = workflow(vec![step.clone()]);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(report.success);
        assert_eq!(report.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backoff_grows_linearly() {
        let calls = Arc::new(AtomicU32::new(0));
        let step = StepDefinition::inline("a", counting_fail(&calls)).with_retries(2);
        let def = workflow(vec![step.clone()]);

        let started = Instant::now();
        executor(20).execute(&step, &def, &snapshot(&def, &[])).await;
        // 20ms after the first failure, 40ms after the second.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn slow_action_times_out() {
        let step = StepDefinition::inline("slow", slow(Duration::from_secs(5)))
            .with_timeout(Duration::from_millis(50));
        let def = workflow(vec![step.clone()]);

        let started = Instant::now();
        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(!report.success);
        assert_eq!(
            report.failure,
            Some(StepFailure::ActionTimedOut(Duration::from_millis(50)))
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn every_attempt_is_timed() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let step = StepDefinition::inline("slow", move |_ctx: ActionContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), ActionError>(())
            }
        })
        .with_timeout(Duration::from_millis(20))
        .with_retries(1);
        let def = workflow(vec![step.clone()]);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(!report.success);
        assert_eq!(report.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn false_condition_skips_without_invoking() {
        let calls = Arc::new(AtomicU32::new(0));
        let step =
            StepDefinition::inline("a", counting_ok(&calls)).with_condition("mode == 'lite'");
        let def = workflow(vec![step.clone()]);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(report.success);
        assert!(report.skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn broken_condition_is_a_skip() {
        let calls = Arc::new(AtomicU32::new(0));
        let step = StepDefinition::inline("a", counting_ok(&calls)).with_condition("undefined_var");
        let def = workflow(vec![step.clone()]);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(report.success);
        assert!(report.skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn true_condition_runs_action() {
        let calls = Arc::new(AtomicU32::new(0));
        let step = StepDefinition::inline("a", counting_ok(&calls)).with_condition("mode == 'full'");
        let def = workflow(vec![step.clone()]);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(report.success);
        assert!(!report.skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsatisfied_dependency_fails_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let dep = StepDefinition::inline("dep", counting_ok(&calls));
        let step = StepDefinition::inline("a", counting_ok(&calls))
            .depends_on(["dep"])
            .with_retries(3);
        let def = workflow(vec![dep, step.clone()]);

        for done in [&[][..], &[("dep", false)][..]] {
            let report = executor(1).execute(&step, &def, &snapshot(&def, done)).await;
            assert!(!report.success);
            assert_eq!(report.attempts, 0);
            assert_eq!(
                report.failure,
                Some(StepFailure::DependencyNotSatisfied("dep".to_string()))
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let report = executor(1)
            .execute(&step, &def, &snapshot(&def, &[("dep", true)]))
            .await;
        assert!(report.success);
    }

    #[tokio::test]
    async fn panicking_action_is_reported_as_thrown() {
        let step = StepDefinition::inline("boom", |_ctx: ActionContext| async {
            if true {
                panic!("step exploded");
            }
            Ok::<(), ActionError>(())
        });
        let def = workflow(vec![step.clone()]);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(!report.success);
        assert_eq!(
            report.failure,
            Some(StepFailure::ActionThrew("action panicked".to_string()))
        );
    }

    #[tokio::test]
    async fn command_step_goes_through_executor_with_variables() {
        let (registry, commands) = registry();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry.register("deploy", move |ctx: ActionContext| {
            *sink.lock().unwrap() = Some((
                ctx.workflow.clone(),
                ctx.step.clone(),
                ctx.variables["mode"].clone(),
            ));
            futures_util::future::ready(Ok::<(), ActionError>(()))
        });

        let step = StepDefinition::command("ship", NamedCommand::new("deploy", ["--now"]));
        let def = workflow(vec![step.clone()]);
        let report = StepExecutor::new(commands, Duration::from_millis(1))
            .execute(&step, &def, &snapshot(&def, &[]))
            .await;

        assert!(report.success);
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(("wf".to_string(), "ship".to_string(), "full".to_string()))
        );
    }

    #[tokio::test]
    async fn unknown_command_fails_the_step() {
        let step = StepDefinition::command("a", NamedCommand::new("nope", Vec::<String>::new()));
        let def = workflow(vec![step.clone()]);

        let report = executor(1).execute(&step, &def, &snapshot(&def, &[])).await;
        assert!(!report.success);
        assert_eq!(
            report.failure,
            Some(StepFailure::ActionThrew("command 'nope' not found".to_string()))
        );
    }
}
