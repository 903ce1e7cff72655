//! Engine configuration loader for flowgate.
//!
//! Reads `flowgate.toml` and deserializes it into [`EngineConfig`]. Falls back
//! to defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use flowgate_types::config::EngineConfig;

/// Directory scanned for workflows when neither the CLI nor the config names one.
pub const DEFAULT_WORKFLOWS_DIR: &str = "workflows";

/// Load engine configuration from `config_path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but cannot be read or parsed, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_engine_config(config_path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Resolve the workflows directory.
///
/// Priority:
/// 1. Explicit override (the `--workflows` flag)
/// 2. `workflows_dir` from the config, relative to the config file's directory
/// 3. `./workflows`
pub fn resolve_workflows_dir(
    config: &EngineConfig,
    config_path: &Path,
    override_dir: Option<&Path>,
) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    match &config.workflows_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => config_path
            .parent()
            .map(|parent| parent.join(dir))
            .unwrap_or_else(|| dir.clone()),
        None => PathBuf::from(DEFAULT_WORKFLOWS_DIR),
    }
}
