//! Application state: config, engine, and the workflows loaded from disk.

use std::path::{Path, PathBuf};

use flowgate_core::workflow::action::BoxCommandExecutor;
use flowgate_core::workflow::definition::discover_workflows;
use flowgate_core::workflow::engine::WorkflowEngine;
use flowgate_infra::command::ShellCommandExecutor;
use flowgate_infra::config::{load_engine_config, resolve_workflows_dir};
use flowgate_types::config::EngineConfig;

/// Everything a CLI command needs.
pub struct AppState {
    pub config: EngineConfig,
    pub workflows_dir: PathBuf,
    pub engine: WorkflowEngine,
}

impl AppState {
    /// Load the config, build the engine, and register every workflow found
    /// in the workflows directory.
    ///
    /// Files that fail to parse or register are skipped with a warning.
    pub async fn init(
        config_path: &Path,
        workflows_override: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let config = load_engine_config(config_path).await;
        let workflows_dir = resolve_workflows_dir(&config, config_path, workflows_override);

        let commands = BoxCommandExecutor::new(ShellCommandExecutor::from_config(&config));
        let engine = WorkflowEngine::new(commands, &config);

        for discovered in discover_workflows(&workflows_dir)? {
            let path = discovered.path.display().to_string();
            if let Err(e) = engine.register_document(&discovered.name, discovered.document) {
                tracing::warn!(%path, error = %e, "skipping workflow");
            }
        }

        tracing::debug!(
            dir = %workflows_dir.display(),
            workflows = engine.list().len(),
            "loaded workflows"
        );

        Ok(Self {
            config,
            workflows_dir,
            engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn init_registers_valid_workflows_and_skips_invalid_ones() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("workflows");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(
            dir.join("build.yaml"),
            "steps:\n  - name: compile\n    command: make\n",
        )
        .unwrap();
        // Parses, but fails validation (unknown dependency).
        std::fs::write(
            dir.join("broken.json"),
            r#"{ "steps": [{ "name": "a", "command": "x", "dependsOn": ["nope"] }] }"#,
        )
        .unwrap();

        let state = AppState::init(&tmp.path().join("missing.toml"), Some(&dir))
            .await
            .unwrap();

        let names: Vec<String> = state.engine.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["build"]);
        assert_eq!(state.workflows_dir, dir);
        assert_eq!(state.config, EngineConfig::default());
    }

    #[tokio::test]
    async fn workflows_dir_comes_from_config() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("flowgate.toml");
        std::fs::write(&config_path, "workflows_dir = \"ops\"\n").unwrap();

        let state = AppState::init(&config_path, None).await.unwrap();
        assert_eq!(state.workflows_dir, tmp.path().join("ops"));
        assert!(state.engine.list().is_empty());
    }
}
