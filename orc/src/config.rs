//! Orchestrator configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,

    /// Worker base URLs forming the static pool
    pub workers: Vec<String>,

    pub assignment: AssignmentConfig,
    pub experts: ExpertsConfig,
}

impl OrchestratorConfig {
    /// Load configuration: explicit path, `.orchestrator.yml`, user config
    /// dir, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".orchestrator.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("orchestrator").join("orchestrator.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.database.as_os_str().is_empty() {
            eyre::bail!("storage.database must not be empty (or set DATABASE_URL)");
        }
        if self.assignment.interval_secs == 0 {
            eyre::bail!("assignment.interval-secs must be at least 1");
        }
        Ok(())
    }
}

/// HTTP server binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path (shared with workers)
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let database = std::env::var("DATABASE_URL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("agentworker.db"));
        Self { database }
    }
}

/// Assignment loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Poll interval for pending jobs and idle workers
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,

    /// Total job wall-clock budget before a forced failure
    #[serde(rename = "wall-clock-days")]
    pub wall_clock_days: u64,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            wall_clock_days: 7,
        }
    }
}

/// Expert bundle locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpertsConfig {
    /// Directory holding one subdirectory per expert
    pub dir: PathBuf,

    /// Base defaults merged under every expert config
    #[serde(rename = "defaults-file")]
    pub defaults_file: PathBuf,
}

impl Default for ExpertsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("experts"),
            defaults_file: PathBuf::from("defaults.yaml"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.assignment.wall_clock_days, 7);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
server:
  port: 8081

workers:
  - http://worker-1:8090
  - http://worker-2:8090

assignment:
  interval-secs: 2
  wall-clock-days: 3

experts:
  dir: /etc/experts
"#;
        let config: OrchestratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.assignment.interval_secs, 2);
        assert_eq!(config.experts.dir, PathBuf::from("/etc/experts"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = OrchestratorConfig::default();
        config.assignment.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_database_default_from_env() {
        // SAFETY: serialized test, no concurrent env access
        unsafe {
            std::env::set_var("DATABASE_URL", "/var/lib/platform/store.db");
        }
        let config = StorageConfig::default();
        unsafe {
            std::env::remove_var("DATABASE_URL");
        }
        assert_eq!(config.database, PathBuf::from("/var/lib/platform/store.db"));
    }
}
