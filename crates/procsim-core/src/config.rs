//! Run configuration.
//!
//! A [`RunConfig`] controls how replications of a compiled network are
//! executed: seeding, error policy, cascade bounds, termination and warm-up.
//! It can be built in code or loaded from TOML (and JSON with the
//! `model-loader` feature). Missing keys take their default values.

use serde::{Deserialize, Serialize};

use crate::sim::SimTime;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[cfg(feature = "model-loader")]
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Replication settings shared by every replication of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Base seed. Replication `i` is seeded with a mix of this and `i`.
    pub seed: u64,
    /// Number of independent replications.
    pub replications: u32,
    /// Escalate formula evaluation errors to an emergency shutdown instead of
    /// substituting zero.
    pub stop_on_calc_error: bool,
    /// Cascade bound, in re-checks per listening station.
    pub max_cascade_rounds: u32,
    /// Period of re-checks for time-gated stations, in milliseconds. `None`
    /// disables timed checks.
    pub timed_check_interval: Option<SimTime>,
    /// Maximum number of warnings kept per replication.
    pub warning_cap: usize,
    /// Stop each replication at this simulated time (seconds).
    pub termination_time: Option<f64>,
    /// Reset statistics at this simulated time (seconds).
    pub warm_up_time: Option<f64>,
    /// Emergency shutdown when a source would push the number of live
    /// clients above this.
    pub max_clients_in_system: Option<usize>,
    /// Entries kept in each replication's journal. Zero disables it.
    pub journal_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            replications: 1,
            stop_on_calc_error: false,
            max_cascade_rounds: 1000,
            timed_check_interval: Some(1000),
            warning_cap: 100,
            termination_time: None,
            warm_up_time: None,
            max_clients_in_system: Some(1_000_000),
            journal_capacity: 0,
        }
    }
}

impl RunConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    #[cfg(feature = "model-loader")]
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_termination_time(mut self, seconds: f64) -> Self {
        self.termination_time = Some(seconds);
        self
    }

    pub fn with_replications(mut self, replications: u32) -> Self {
        self.replications = replications;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replications == 0 {
            return Err(ConfigError::Invalid("replications must be at least 1".into()));
        }
        if self.max_cascade_rounds == 0 {
            return Err(ConfigError::Invalid(
                "max_cascade_rounds must be at least 1".into(),
            ));
        }
        if self.timed_check_interval == Some(0) {
            return Err(ConfigError::Invalid(
                "timed_check_interval must be positive".into(),
            ));
        }
        for (name, value) in [
            ("termination_time", self.termination_time),
            ("warm_up_time", self.warm_up_time),
        ] {
            if value.is_some_and(|v| !(v.is_finite() && v >= 0.0)) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}
