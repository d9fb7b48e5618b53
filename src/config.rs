//! JSON engine configuration files.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::ShiftDecimatorConfig;
use crate::gpu::ContextConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Context and shift-decimator options in one file.
///
/// Missing fields take their defaults, so `{}` is a valid config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub context: ContextConfig,
    pub decimator: ShiftDecimatorConfig,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from a file, then apply environment overrides to the context section.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_json(&fs::read_to_string(path)?)?;
        config.context = config.context.with_env_overrides();
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Scheduling;

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json(
            r#"{"context": {"max_queues": 1}, "decimator": {"scheduling": "multi-queue", "workgroup_size": 128}}"#,
        )
        .unwrap();
        assert_eq!(config.context.max_queues, 1);
        assert_eq!(config.decimator.scheduling, Scheduling::MultiQueue);
        assert_eq!(config.decimator.workgroup_size, 128);
        assert_eq!(config.decimator.counter_window, 120);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let mut config = EngineConfig::default();
        config.decimator.max_block_size = 65536;
        config.decimator.fence_timeout_ms = None;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.decimator, config.decimator);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            EngineConfig::from_json("{\"decimator\": 3}"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            EngineConfig::load("/nonexistent/engine.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
