use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

/// Runtime configuration. Loaded from `config.toml` in the working directory
/// when present; env vars (`MODEL_ID`, `BASE_URL`) override the provider
/// fields at client construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: String,
    pub base_url: String,
    /// Global ceiling on observed steps per task.
    pub max_steps: u32,
    /// Consecutive same-step failures that trigger plan revision.
    pub failure_threshold: u32,
    pub memory_db: String,
    /// Substrings that mark a step outcome worth remembering.
    pub memory_gate: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "llama3.2:1b".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            max_steps: 8,
            failure_threshold: 2,
            memory_db: "agent_memory.db".to_string(),
            memory_gate: vec![
                "output:".to_string(),
                "failed".to_string(),
                "Cannot".to_string(),
            ],
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring malformed config {}: {e}", path.display());
                Self::default()
            }
        }
    }
}
