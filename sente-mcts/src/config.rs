//! Search configuration: one immutable struct handed to the driver.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Tuning surface of the search core. Values are fixed for the lifetime of
/// a `Search`; there is no mutable global state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchConfig {
    /// PUCT exploration constant.
    #[serde(default = "default_c_puct")]
    pub c_puct: f32,
    /// First-play-urgency reduction at interior nodes.
    #[serde(default = "default_fpu_reduction")]
    pub fpu_reduction: f32,
    /// First-play-urgency reduction at the root.
    #[serde(default = "default_fpu_reduction")]
    pub fpu_root_reduction: f32,
    /// Floor for the progressive-widening prior ratio in `[0, 1]`.
    #[serde(default)]
    pub widening_ratio_floor: f32,
    /// Playout budget per think (`u32::MAX` = unlimited).
    #[serde(default = "default_unlimited")]
    pub max_playouts: u32,
    /// Root visit cap per think (`u32::MAX` = unlimited).
    #[serde(default = "default_unlimited")]
    pub max_visits: u32,
    /// Per-move wall-clock budget in milliseconds.
    #[serde(default)]
    pub move_time_ms: Option<u64>,
    /// Virtual-loss magnitude applied per traversal.
    #[serde(default = "default_virtual_loss")]
    pub virtual_loss: u32,
    /// Minimum visits before `eval_lcb` leaves its sentinel.
    #[serde(default = "default_lcb_min_visits")]
    pub lcb_min_visits: u32,
    /// Suppress the pass candidate after an opponent pass when the network
    /// looks confident but the board count says passing loses.
    #[serde(default = "default_true")]
    pub suppress_pass: bool,
    /// Worker tasks sharing the tree.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Run-level seed; each worker derives its own stream from it.
    #[serde(default)]
    pub seed: u64,
    /// Root Dirichlet noise concentration (self-play exploration).
    #[serde(default = "default_dirichlet_alpha")]
    pub dirichlet_alpha: f32,
    /// Root Dirichlet mix-in fraction; 0 disables noise.
    #[serde(default)]
    pub dirichlet_epsilon: f32,
    /// Resign when the best winrate falls below this; 0 disables.
    #[serde(default)]
    pub resign_threshold: f32,
}

fn default_c_puct() -> f32 {
    0.5
}

fn default_fpu_reduction() -> f32 {
    0.25
}

fn default_unlimited() -> u32 {
    u32::MAX
}

fn default_virtual_loss() -> u32 {
    3
}

fn default_lcb_min_visits() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    1
}

fn default_dirichlet_alpha() -> f32 {
    0.03
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            c_puct: default_c_puct(),
            fpu_reduction: default_fpu_reduction(),
            fpu_root_reduction: default_fpu_reduction(),
            widening_ratio_floor: 0.0,
            max_playouts: default_unlimited(),
            max_visits: default_unlimited(),
            move_time_ms: None,
            virtual_loss: default_virtual_loss(),
            lcb_min_visits: default_lcb_min_visits(),
            suppress_pass: default_true(),
            workers: default_workers(),
            seed: 0,
            dirichlet_alpha: default_dirichlet_alpha(),
            dirichlet_epsilon: 0.0,
            resign_threshold: 0.0,
        }
    }
}

impl SearchConfig {
    /// Load from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Load from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if !(self.c_puct.is_finite() && self.c_puct > 0.0) {
            return Err("c_puct must be finite and > 0");
        }
        if !(self.fpu_reduction.is_finite() && self.fpu_reduction >= 0.0) {
            return Err("fpu_reduction must be finite and >= 0");
        }
        if !(self.fpu_root_reduction.is_finite() && self.fpu_root_reduction >= 0.0) {
            return Err("fpu_root_reduction must be finite and >= 0");
        }
        if !(0.0..=1.0).contains(&self.widening_ratio_floor) {
            return Err("widening_ratio_floor must be in [0, 1]");
        }
        if self.workers == 0 {
            return Err("workers must be > 0");
        }
        if !(self.dirichlet_epsilon.is_finite() && (0.0..=1.0).contains(&self.dirichlet_epsilon)) {
            return Err("dirichlet_epsilon must be in [0, 1]");
        }
        if self.dirichlet_epsilon > 0.0
            && !(self.dirichlet_alpha.is_finite() && self.dirichlet_alpha > 0.0)
        {
            return Err("dirichlet_alpha must be > 0 when noise is enabled");
        }
        if !(self.resign_threshold.is_finite() && (0.0..=1.0).contains(&self.resign_threshold)) {
            return Err("resign_threshold must be in [0, 1]");
        }
        Ok(())
    }
}

/// Per-think overrides of the configured budgets. Fields left `None` fall
/// back to the config.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThinkBudget {
    pub playouts: Option<u32>,
    pub visits: Option<u32>,
    pub time: Option<Duration>,
}

impl ThinkBudget {
    pub fn playouts(n: u32) -> ThinkBudget {
        ThinkBudget {
            playouts: Some(n),
            ..ThinkBudget::default()
        }
    }

    pub fn visits(n: u32) -> ThinkBudget {
        ThinkBudget {
            visits: Some(n),
            ..ThinkBudget::default()
        }
    }

    pub fn time(d: Duration) -> ThinkBudget {
        ThinkBudget {
            time: Some(d),
            ..ThinkBudget::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SearchConfig::default().validate().is_ok());
    }

    #[test]
    fn yaml_overrides_and_defaults_mix() {
        let cfg = SearchConfig::from_yaml(
            r#"
c_puct: 1.2
workers: 4
max_playouts: 1600
suppress_pass: false
"#,
        )
        .unwrap();
        assert_eq!(cfg.c_puct, 1.2);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.max_playouts, 1600);
        assert!(!cfg.suppress_pass);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.virtual_loss, 3);
        assert_eq!(cfg.lcb_min_visits, 2);
    }

    #[test]
    fn invalid_yaml_fails() {
        assert!(SearchConfig::from_yaml("c_puct: {{{").is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = SearchConfig::default();
        cfg.c_puct = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = SearchConfig::default();
        cfg.workers = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SearchConfig::default();
        cfg.widening_ratio_floor = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = SearchConfig::default();
        cfg.dirichlet_epsilon = 0.25;
        cfg.dirichlet_alpha = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_roundtrips_through_yaml() {
        let cfg = SearchConfig::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back = SearchConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back.c_puct, cfg.c_puct);
        assert_eq!(back.max_playouts, cfg.max_playouts);
        assert_eq!(back.workers, cfg.workers);
    }
}
