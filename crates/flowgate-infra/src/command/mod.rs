//! Process-backed command executor.
//!
//! Implements [`CommandExecutor`] by spawning the named command as a child
//! process. Command names are first looked up in an alias table (the
//! `[commands]` section of `flowgate.toml`); an alias expands to its own
//! command line with the step's arguments appended.
//!
//! The child sees the run variables as `FLOWGATE_VAR_<NAME>` plus
//! `FLOWGATE_WORKFLOW` and `FLOWGATE_STEP`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use flowgate_core::workflow::action::{ActionContext, ActionError, CommandExecutor, NamedCommand};
use flowgate_types::config::EngineConfig;

/// Prefix for run variables exported to child processes.
pub const VAR_PREFIX: &str = "FLOWGATE_VAR_";

/// Longest stderr excerpt carried in a failure message.
const MAX_STDERR_CHARS: usize = 512;

/// Runs step commands as child processes.
#[derive(Debug, Clone, Default)]
pub struct ShellCommandExecutor {
    aliases: HashMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl ShellCommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor using the config's `[commands]` alias table.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new().with_aliases(config.commands.clone())
    }

    pub fn with_aliases(mut self, aliases: HashMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Run every command from `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Expand aliases into the program and arguments to spawn.
    fn resolve(&self, command: &NamedCommand) -> Result<NamedCommand, ActionError> {
        let Some(line) = self.aliases.get(&command.name) else {
            return Ok(command.clone());
        };

        let mut expanded = NamedCommand::parse(line)
            .ok_or_else(|| ActionError::CommandNotFound(command.name.clone()))?;
        expanded.args.extend(command.args.iter().cloned());
        tracing::trace!(alias = %command.name, expanded = %expanded, "expanded command alias");
        Ok(expanded)
    }

    /// Build the child process for one invocation.
    fn build_command(
        &self,
        command: &NamedCommand,
        context: &ActionContext,
    ) -> Result<(NamedCommand, tokio::process::Command), ActionError> {
        let resolved = self.resolve(command)?;

        let mut process = tokio::process::Command::new(&resolved.name);
        process
            .args(&resolved.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("FLOWGATE_WORKFLOW", &context.workflow)
            .env("FLOWGATE_STEP", &context.step);

        for (name, value) in context.variables.iter() {
            match env_var_name(name) {
                Some(key) if !value.contains('\0') => {
                    process.env(key, value);
                }
                _ => {
                    tracing::debug!(variable = %name, "variable not exportable to child environment");
                }
            }
        }

        if let Some(dir) = &self.working_dir {
            process.current_dir(dir);
        }

        Ok((resolved, process))
    }
}

impl CommandExecutor for ShellCommandExecutor {
    async fn execute(
        &self,
        command: &NamedCommand,
        context: &ActionContext,
    ) -> Result<(), ActionError> {
        let (resolved, mut process) = self.build_command(command, context)?;

        tracing::debug!(
            workflow = %context.workflow,
            step = %context.step,
            command = %resolved,
            "spawning command"
        );

        let output = process.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ActionError::CommandNotFound(resolved.name.clone())
            } else {
                ActionError::failed(format!("failed to spawn '{}': {e}", resolved.name))
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            tracing::debug!(step = %context.step, "{line}");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
            return Err(ActionError::failed(if excerpt.is_empty() {
                format!("'{resolved}' exited with {}", output.status)
            } else {
                format!("'{resolved}' exited with {}: {excerpt}", output.status)
            }));
        }

        Ok(())
    }
}

/// `mode` -> `FLOWGATE_VAR_MODE`; characters outside `[A-Za-z0-9_]` become `_`.
pub fn env_var_name(variable: &str) -> Option<String> {
    if variable.is_empty() {
        return None;
    }
    let suffix: String = variable
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    Some(format!("{VAR_PREFIX}{suffix}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
