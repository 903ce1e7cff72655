//! Engine configuration types for flowgate.
//!
//! `EngineConfig` represents the top-level `flowgate.toml`. All fields have
//! defaults so an empty or missing file is valid.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the engine and its CLI host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base of the linear retry backoff: attempt `n` waits `base * (n + 1)`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Run independent steps concurrently when the caller does not say.
    #[serde(default)]
    pub default_parallel: bool,

    /// Directory scanned for workflow documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<PathBuf>,

    /// Command aliases: a step command named like a key runs the value instead.
    #[serde(default)]
    pub commands: HashMap<String, String>,
}

fn default_backoff_base_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            default_parallel: false,
            workflows_dir: None,
            commands: HashMap::new(),
        }
    }
}
