//! Graph Configuration
//!
//! Tunables for a [`Graph`](crate::graph::Graph). Configs are plain data and
//! can be loaded from JSON so that test harnesses and hosts can share one
//! settings file.

use serde::{Deserialize, Serialize};

use crate::error::{TetherError, TetherResult};

/// Runtime configuration for one dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Name attached to the graph's log events.
    /// Default: "graph".
    pub label: String,

    /// Maximum number of nested evaluations (computed reading computed ...).
    /// Default: 256.
    pub max_depth: usize,

    /// Maximum number of propagation passes a single flush may run when
    /// watchers keep writing to sources.
    /// Default: 64.
    pub max_flush_passes: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            label: "graph".to_string(),
            max_depth: 256,
            max_flush_passes: 64,
        }
    }
}

impl GraphConfig {
    /// Config with the given label and default limits.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> TetherResult<()> {
        if self.label.is_empty() {
            return Err(TetherError::Config("label must not be empty".to_string()));
        }
        if self.max_depth < 1 {
            return Err(TetherError::Config(format!(
                "max_depth must be >= 1, got {}",
                self.max_depth
            )));
        }
        if self.max_flush_passes < 1 {
            return Err(TetherError::Config(format!(
                "max_flush_passes must be >= 1, got {}",
                self.max_flush_passes
            )));
        }
        Ok(())
    }

    /// Load from JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> TetherResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TetherError::Config(format!("JSON parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}
