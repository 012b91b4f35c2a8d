//! Settings for a whole simulated world, loadable from a JSON file.

use crate::devices::{LeakDetectorConfig, ValveConfig};
use ges_core::SimConfig;
use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path};
use thiserror::Error as ThisError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub sim: SimConfig,
    pub valve: ValveConfig,
    pub leak_detector: LeakDetectorConfig,
    /// Base URL of the cloud functions. Requests are only logged when unset.
    pub cloud_endpoint: Option<String>,
}

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl WorldConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would stall the simulation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.valve.heartbeat_period == 0 {
            return Err(ConfigError::Invalid("valve.heartbeat_period must be positive".into()));
        }
        if self.leak_detector.heartbeat_period == 0 {
            return Err(ConfigError::Invalid(
                "leak_detector.heartbeat_period must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Window;

    #[test]
    fn missing_fields_take_defaults() {
        let config = WorldConfig::from_json(
            r#"{
                "sim": { "seed": 7 },
                "valve": { "chance_to_stall": 0, "reopen_delay": null },
                "leak_detector": { "leak_timeframe": { "min": 60.0, "max": 600.0 } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.sim.seed, Some(7));
        assert_eq!(config.valve.chance_to_stall, 0);
        assert_eq!(config.valve.reopen_delay, None);
        assert_eq!(config.valve.heartbeat_period, 3600);
        assert_eq!(config.leak_detector.leak_timeframe, Window::new(60.0, 600.0));
        assert_eq!(config.cloud_endpoint, None);
    }

    #[test]
    fn bad_files_are_reported() {
        assert!(matches!(
            WorldConfig::from_json("{ \"valve\": 3 }"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            WorldConfig::load("/nonexistent/ges.json"),
            Err(ConfigError::Io { .. })
        ));
        assert!(matches!(
            WorldConfig::from_json(r#"{ "leak_detector": { "heartbeat_period": 0 } }"#),
            Err(ConfigError::Invalid(_))
        ));
    }
}
