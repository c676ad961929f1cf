//! Engine Configuration
//!
//! Settings fixed for the lifetime of an engine: the output sample rate, the
//! initial master volume and the capacities of the control/audio rings.
//! Missing JSON fields fall back to their defaults.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or validating an [`EngineConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("master volume {0} outside [0, 1]")]
    InvalidMasterVolume(f64),

    #[error("{name} capacity must be at least 1")]
    InvalidCapacity { name: &'static str },

    #[error("config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz
    pub sample_rate: f64,
    /// Master volume of the graph an engine starts with
    pub master_volume: f64,
    /// Slots in the control → audio command ring
    pub command_capacity: usize,
    /// Slots in the audio → control ring returning retired graphs; also the
    /// most graph swaps that may be outstanding before `install` refuses more
    pub retire_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            master_volume: crate::graph::DEFAULT_MASTER_VOLUME,
            command_capacity: 64,
            retire_capacity: 8,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_master_volume(mut self, volume: f64) -> Self {
        self.master_volume = volume;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if !(0.0..=1.0).contains(&self.master_volume) {
            return Err(ConfigError::InvalidMasterVolume(self.master_volume));
        }
        if self.command_capacity == 0 {
            return Err(ConfigError::InvalidCapacity { name: "command" });
        }
        if self.retire_capacity == 0 {
            return Err(ConfigError::InvalidCapacity { name: "retire" });
        }
        Ok(())
    }

    /// Parse and validate
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
