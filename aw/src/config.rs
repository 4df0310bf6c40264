//! Agent worker configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// HTTP control server
    pub server: ServerConfig,

    /// Storage locations
    pub storage: StorageConfig,

    /// Orchestrator callback settings
    pub orchestrator: CallbackConfig,
}

impl WorkerConfig {
    /// Load configuration with fallback chain: explicit path, project-local
    /// `.agentworker.yml`, user config dir, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".agentworker.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("agentworker").join("agentworker.yml");
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

    /// Fail fast on unusable settings (exit code 2 territory)
    pub fn validate(&self) -> Result<()> {
        if self.storage.database.as_os_str().is_empty() {
            eyre::bail!("storage.database must not be empty (or set DATABASE_URL)");
        }
        if self.orchestrator.heartbeat_secs == 0 {
            eyre::bail!("orchestrator.heartbeat-secs must be at least 1");
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
            port: 8090,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one workspace per job
    #[serde(rename = "workspace-root")]
    pub workspace_root: PathBuf,

    /// SQLite database path (shared with the orchestrator)
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let database = std::env::var("DATABASE_URL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("agentworker.db"));
        Self {
            workspace_root: PathBuf::from("workspaces"),
            database,
        }
    }
}

/// Worker-to-orchestrator callback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Orchestrator base URL; unset disables callbacks (dev mode)
    pub url: Option<String>,

    /// Heartbeat interval for status reports
    #[serde(rename = "heartbeat-secs")]
    pub heartbeat_secs: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            url: None,
            heartbeat_secs: 30,
        }
    }
}
