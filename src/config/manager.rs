//! Configuration file handling
//!
//! Reads and writes .coding-manager/config.yaml for project-specific settings.

use super::{ManagerConfig, StepMode};
use crate::file_storage::{atomic_write, get_project_dir};
use crate::utils::ResultExt;
use std::path::{Path, PathBuf};

/// Configuration file manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager for a project
    pub fn new(project_path: &Path) -> Self {
        Self {
            config_path: get_project_dir(project_path).join("config.yaml"),
        }
    }

    /// Check if config file exists
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Read config from file, returning defaults if not found
    pub fn read(&self) -> Result<ManagerConfig, String> {
        if !self.config_path.exists() {
            return Ok(ManagerConfig::default());
        }

        let content =
            std::fs::read_to_string(&self.config_path).with_context("Failed to read config file")?;

        serde_yaml::from_str(&content).with_context("Failed to parse config file")
    }

    /// Write config to file
    pub fn write(&self, config: &ManagerConfig) -> Result<(), String> {
        let content = serde_yaml::to_string(config).with_context("Failed to serialize config")?;
        atomic_write(&self.config_path, &content)
    }

    /// Initialize config with defaults if it doesn't exist
    pub fn initialize(&self) -> Result<ManagerConfig, String> {
        if self.exists() {
            return self.read();
        }

        let config = ManagerConfig::default();
        self.write(&config)?;
        Ok(config)
    }

    /// Update specific fields in the config
    pub fn update<F>(&self, updater: F) -> Result<ManagerConfig, String>
    where
        F: FnOnce(&mut ManagerConfig),
    {
        let mut config = self.read()?;
        updater(&mut config);
        self.write(&config)?;
        Ok(config)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

/// Command-line overrides applied on top of the file config
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub ws_url: Option<String>,
    pub http_url: Option<String>,
    pub interval_ms: Option<u64>,
    pub max_iterations: Option<u32>,
    pub steps: Option<StepMode>,
    pub data_dir: Option<PathBuf>,
    pub port: Option<u16>,
}

/// Merge config values with command-line overrides.
/// Override value wins, then the file value (which already carries defaults).
pub fn merge_overrides(file_config: &ManagerConfig, overrides: &ConfigOverrides) -> ManagerConfig {
    let mut merged = file_config.clone();

    if let Some(ref url) = overrides.ws_url {
        merged.backend.ws_url = url.clone();
    }
    if let Some(ref url) = overrides.http_url {
        merged.backend.http_url = url.clone();
    }
    merged.agent.interval_ms = overrides.interval_ms.unwrap_or(file_config.agent.interval_ms);
    merged.agent.max_iterations = overrides
        .max_iterations
        .unwrap_or(file_config.agent.max_iterations);
    merged.agent.steps = overrides.steps.unwrap_or(file_config.agent.steps);
    merged.learning.data_dir = overrides
        .data_dir
        .clone()
        .or_else(|| file_config.learning.data_dir.clone());
    merged.server.port = overrides.port.unwrap_or(file_config.server.port);

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_read_defaults_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());

        assert!(!manager.exists());
        let config = manager.read().unwrap();
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(config.backend.request_timeout_secs, 30);
    }

    #[test]
    fn test_config_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());

        let mut config = ManagerConfig::default();
        config.agent.max_iterations = 12;
        config.learning.append_on_update = false;

        manager.write(&config).unwrap();
        assert!(manager.path().ends_with(".coding-manager/config.yaml"));

        let read_config = manager.read().unwrap();
        assert_eq!(read_config.agent.max_iterations, 12);
        assert!(!read_config.learning.append_on_update);
    }

    #[test]
    fn test_config_update() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());

        manager.initialize().unwrap();
        assert!(manager.exists());

        let updated = manager
            .update(|c| {
                c.agent.interval_ms = 250;
            })
            .unwrap();

        assert_eq!(updated.agent.interval_ms, 250);
        assert_eq!(manager.read().unwrap().agent.interval_ms, 250);
    }

    #[test]
    fn test_config_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(temp_dir.path());
        std::fs::create_dir_all(manager.path().parent().unwrap()).unwrap();
        std::fs::write(manager.path(), "agent: [not, a, map").unwrap();

        let err = manager.read().unwrap_err();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_merge_overrides() {
        let mut file_config = ManagerConfig::default();
        file_config.agent.max_iterations = 8;
        file_config.agent.interval_ms = 2000;

        let overrides = ConfigOverrides {
            max_iterations: Some(3),
            ws_url: Some("ws://example:9000/ws".to_string()),
            ..Default::default()
        };
        let merged = merge_overrides(&file_config, &overrides);

        assert_eq!(merged.agent.max_iterations, 3); // overridden
        assert_eq!(merged.agent.interval_ms, 2000); // from file
        assert_eq!(merged.backend.ws_url, "ws://example:9000/ws"); // overridden
        assert_eq!(merged.backend.http_url, "http://127.0.0.1:3421"); // default
    }
}
