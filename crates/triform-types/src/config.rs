//! Engine configuration types for Triform.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls the
//! worker pool, default step timeout and retry policy, checkpoint retention,
//! lineage bounds, and conversion thresholds.

use serde::{Deserialize, Serialize};

use crate::workflow::RetryConfig;

/// Top-level configuration for the Triform engine.
///
/// Loaded from `~/.triform/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker-pool size: maximum number of steps running concurrently.
    #[serde(default = "default_max_parallel_steps")]
    pub max_parallel_steps: usize,

    /// Wall-clock timeout for a step attempt when the step sets none.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// Retry policy for steps that do not carry their own.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Number of checkpoints kept per workflow.
    #[serde(default = "default_checkpoint_retention")]
    pub checkpoint_retention: usize,

    /// Maximum BFS depth for lineage traces.
    #[serde(default = "default_lineage_max_depth")]
    pub lineage_max_depth: usize,

    /// Representation conversion settings.
    #[serde(default)]
    pub conversion: ConversionConfig,
}

fn default_max_parallel_steps() -> usize {
    4
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_checkpoint_retention() -> usize {
    5
}

fn default_lineage_max_depth() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: default_max_parallel_steps(),
            default_step_timeout_secs: default_step_timeout_secs(),
            retry: RetryConfig::default(),
            checkpoint_retention: default_checkpoint_retention(),
            lineage_max_depth: default_lineage_max_depth(),
            conversion: ConversionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Worker-pool size, never below one.
    pub fn worker_pool_size(&self) -> usize {
        self.max_parallel_steps.max(1)
    }

    /// Checkpoint retention, never below one.
    pub fn retention(&self) -> usize {
        self.checkpoint_retention.max(1)
    }
}

/// Settings for the representation conversion bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Absolute correlation above which a matrix entry becomes a graph edge.
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
}

fn default_correlation_threshold() -> f64 {
    0.3
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            correlation_threshold: default_correlation_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_parallel_steps, 4);
        assert_eq!(config.default_step_timeout_secs, 300);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.checkpoint_retention, 5);
        assert_eq!(config.lineage_max_depth, 64);
        assert!((config.conversion.correlation_threshold - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_engine_config_deserialize_with_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_deserialize_with_values() {
        let toml_str = r#"
max_parallel_steps = 8
checkpoint_retention = 2

[retry]
max_attempts = 6
initial_backoff_ms = 50

[conversion]
correlation_threshold = 0.5
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_parallel_steps, 8);
        assert_eq!(config.checkpoint_retention, 2);
        assert_eq!(config.retry.max_attempts, 6);
        assert_eq!(config.retry.initial_backoff_ms, 50);
        assert_eq!(config.retry.max_backoff_ms, 10_000);
        assert_eq!(config.default_step_timeout_secs, 300);
        assert!((config.conversion.correlation_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_floors_apply() {
        let config = EngineConfig {
            max_parallel_steps: 0,
            checkpoint_retention: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.worker_pool_size(), 1);
        assert_eq!(config.retention(), 1);
    }
}
