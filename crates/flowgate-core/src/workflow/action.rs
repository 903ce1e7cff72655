//! Step actions and the command executor port.
//!
//! A step either names a command (`StepAction::Command`), which is resolved
//! only through the injected [`CommandExecutor`], or carries an inline handle
//! (`StepAction::Inline`) that is invoked directly. Both receive an
//! [`ActionContext`] that points back at the host executor so inline code can
//! dispatch nested commands.
//!
//! `CommandExecutor` uses native async fn in traits; [`BoxCommandExecutor`]
//! provides the type-erased form the engine stores, following the same
//! blanket-impl pattern as the other boxed ports:
//! 1. Define an object-safe `CommandExecutorDyn` trait with boxed futures
//! 2. Blanket-impl `CommandExecutorDyn` for all `T: CommandExecutor`
//! 3. `BoxCommandExecutor` wraps `Arc<dyn CommandExecutorDyn>` and delegates

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a step action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The command executor has no command with this name.
    #[error("command '{0}' not found")]
    CommandNotFound(String),

    /// The action ran and reported failure.
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ActionError::Failed(message.into())
    }
}

// ---------------------------------------------------------------------------
// NamedCommand
// ---------------------------------------------------------------------------

/// A command reference: name plus positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedCommand {
    pub name: String,
    pub args: Vec<String>,
}

impl NamedCommand {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a `<name> [args...]` command line on whitespace.
    ///
    /// Returns `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let name = parts.next()?;
        Some(Self::new(name, parts))
    }
}

impl fmt::Display for NamedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ActionContext
// ---------------------------------------------------------------------------

/// What an action sees when it is invoked.
#[derive(Clone)]
pub struct ActionContext {
    /// Name of the workflow being run.
    pub workflow: String,
    /// Name of the step being executed.
    pub step: String,
    /// Run variables (workflow defaults overlaid with caller overrides).
    pub variables: Arc<HashMap<String, String>>,
    /// The host's command executor, for nested command lookup.
    pub host: BoxCommandExecutor,
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("workflow", &self.workflow)
            .field("step", &self.step)
            .field("variables", &self.variables)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// CommandExecutor port
// ---------------------------------------------------------------------------

/// Executes named commands on behalf of the engine.
///
/// Any `Err` is treated as a failed attempt of the step.
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        command: &NamedCommand,
        context: &ActionContext,
    ) -> impl Future<Output = Result<(), ActionError>> + Send;
}

/// Object-safe version of [`CommandExecutor`] with boxed futures.
pub trait CommandExecutorDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        command: &'a NamedCommand,
        context: &'a ActionContext,
    ) -> BoxFuture<'a, Result<(), ActionError>>;
}

impl<T: CommandExecutor> CommandExecutorDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        command: &'a NamedCommand,
        context: &'a ActionContext,
    ) -> BoxFuture<'a, Result<(), ActionError>> {
        Box::pin(self.execute(command, context))
    }
}

/// Type-erased, cheaply cloneable command executor.
#[derive(Clone)]
pub struct BoxCommandExecutor {
    inner: Arc<dyn CommandExecutorDyn>,
}

impl BoxCommandExecutor {
    pub fn new<T: CommandExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub async fn execute(
        &self,
        command: &NamedCommand,
        context: &ActionContext,
    ) -> Result<(), ActionError> {
        self.inner.execute_boxed(command, context).await
    }
}

impl fmt::Debug for BoxCommandExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BoxCommandExecutor")
    }
}

// ---------------------------------------------------------------------------
// Inline actions
// ---------------------------------------------------------------------------

/// An in-process step action.
///
/// Implemented for any `Fn(ActionContext) -> impl Future<Output = Result<(), ActionError>>`.
pub trait InlineAction: Send + Sync {
    fn invoke(&self, context: ActionContext) -> BoxFuture<'static, Result<(), ActionError>>;
}

impl<F, Fut> InlineAction for F
where
    F: Fn(ActionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    fn invoke(&self, context: ActionContext) -> BoxFuture<'static, Result<(), ActionError>> {
        Box::pin(self(context))
    }
}

/// Shared handle to an inline action.
#[derive(Clone)]
pub struct InlineHandle {
    action: Arc<dyn InlineAction>,
}

impl InlineHandle {
    pub fn new<A: InlineAction + 'static>(action: A) -> Self {
        Self {
            action: Arc::new(action),
        }
    }

    pub fn invoke(&self, context: ActionContext) -> BoxFuture<'static, Result<(), ActionError>> {
        self.action.invoke(context)
    }
}

impl fmt::Debug for InlineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InlineHandle")
    }
}

// ---------------------------------------------------------------------------
// StepAction
// ---------------------------------------------------------------------------

/// What a step does when it runs.
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Dispatched through the injected command executor.
    Command(NamedCommand),
    /// Invoked directly, bypassing name lookup.
    Inline(InlineHandle),
}

impl StepAction {
    /// Start one invocation of the action.
    ///
    /// The returned future owns everything it needs, so it can be spawned.
    pub fn invoke(&self, context: ActionContext) -> BoxFuture<'static, Result<(), ActionError>> {
        match self {
            StepAction::Command(command) => {
                let command = command.clone();
                Box::pin(async move {
                    let host = context.host.clone();
                    host.execute(&command, &context).await
                })
            }
            StepAction::Inline(handle) => handle.invoke(context),
        }
    }

    /// Short label used in logs and listings.
    pub fn describe(&self) -> String {
        match self {
            StepAction::Command(command) => command.to_string(),
            StepAction::Inline(_) => "<inline>".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// CommandRegistry
// ---------------------------------------------------------------------------

/// In-process command table: command names mapped to inline handles.
///
/// Useful for embedding the engine in an application that registers its own
/// commands instead of shelling out.
#[derive(Default)]
pub struct CommandRegistry {
    commands: DashMap<String, InlineHandle>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a command.
    pub fn register<A: InlineAction + 'static>(&self, name: impl Into<String>, action: A) {
        self.commands.insert(name.into(), InlineHandle::new(action));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }
}

impl CommandExecutor for CommandRegistry {
    async fn execute(
        &self,
        command: &NamedCommand,
        context: &ActionContext,
    ) -> Result<(), ActionError> {
        // Clone the handle out so the map shard is not locked across the await.
        let handle = self
            .commands
            .get(&command.name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ActionError::CommandNotFound(command.name.clone()))?;
        handle.invoke(context.clone()).await
    }
}

impl CommandExecutor for Arc<CommandRegistry> {
    async fn execute(
        &self,
        command: &NamedCommand,
        context: &ActionContext,
    ) -> Result<(), ActionError> {
        self.as_ref().execute(command, context).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
