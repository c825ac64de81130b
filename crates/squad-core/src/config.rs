//! Workspace configuration schema.
//!
//! Loading a YAML workspace config off disk is an external collaborator's
//! job; this module only defines the struct that collaborator populates, the
//! way `openintent-agent::config` defines settings structs independent of
//! whoever reads the YAML.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Thresholds the router uses to derive destination health from the
/// routing-event window. Defaults match spec §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub window: usize,
    pub min_events: usize,
    pub circuit_breaker_block_rate: f64,
    pub throttle_block_rate: f64,
    pub warn_block_rate: f64,
    pub critical_block_rate: f64,
    pub circuit_recovery_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: 200,
            min_events: 5,
            circuit_breaker_block_rate: 0.7,
            throttle_block_rate: 0.5,
            warn_block_rate: 0.25,
            critical_block_rate: 0.5,
            circuit_recovery_seconds: 60,
        }
    }
}

/// Defaults consulted by the convoy executor's auto-tuner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvoyConfig {
    pub default_max_parallel: usize,
    pub baseline_parallel: usize,
    pub cpu_threshold: f32,
    pub memory_threshold: f32,
    pub sample_interval_seconds: u64,
    pub default_timeout_minutes: u64,
}

impl Default for ConvoyConfig {
    fn default() -> Self {
        Self {
            default_max_parallel: 4,
            baseline_parallel: 2,
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            sample_interval_seconds: 2,
            default_timeout_minutes: 30,
        }
    }
}

/// Hook (per-work-item on-disk snapshot) behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub enabled: bool,
    pub checkout_working_tree: bool,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            checkout_working_tree: false,
        }
    }
}

/// Top-level workspace configuration. The `squad_dir` field lets a
/// workspace relocate its state directory away from the `.squad/` default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub squad_dir: String,
    pub hooks: HookConfig,
    pub health: HealthConfig,
    pub convoy: ConvoyConfig,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            squad_dir: ".squad".to_string(),
            hooks: HookConfig::default(),
            health: HealthConfig::default(),
            convoy: ConvoyConfig::default(),
        }
    }
}

impl WorkspaceConfig {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn with_squad_dir(mut self, dir: impl Into<String>) -> Self {
        self.squad_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_yaml() {
        let cfg = WorkspaceConfig::default();
        let yaml = cfg.to_yaml().unwrap();
        let back = WorkspaceConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back.squad_dir, cfg.squad_dir);
        assert_eq!(back.health.window, cfg.health.window);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let cfg = WorkspaceConfig::from_yaml("squad_dir: .myworkspace\n").unwrap();
        assert_eq!(cfg.squad_dir, ".myworkspace");
        assert_eq!(cfg.convoy.baseline_parallel, 2);
    }
}
