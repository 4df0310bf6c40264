//! Expert bundle loading
//!
//! An expert is a directory with a `config.yaml` (a config layer) and an
//! `instructions.md` (prompt text written into the workspace). The
//! defaults file underneath every expert is a plain YAML config layer.

use std::path::Path;

use eyre::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

/// One resolved expert bundle
#[derive(Debug, Clone, Default)]
pub struct ExpertBundle {
    /// Config layer from config.yaml (empty object when absent)
    pub config: Value,
    /// Instructions text from instructions.md (empty when absent)
    pub instructions: String,
}

/// Load the defaults layer; a missing file is an empty layer
pub fn load_defaults(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "no defaults file, using empty layer");
        return Ok(Value::Object(serde_json::Map::new()));
    }
    let content = std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&content).context(format!("Failed to parse {}", path.display()))?;
    Ok(value)
}

/// Load an expert bundle by id from the experts directory.
///
/// A missing expert directory yields an empty bundle with a warning, so
/// "default" works without any files on disk.
pub fn load_expert(experts_dir: impl AsRef<Path>, expert_id: &str) -> Result<ExpertBundle> {
    let dir = experts_dir.as_ref().join(expert_id);
    if !dir.is_dir() {
        warn!(expert_id, dir = %dir.display(), "expert directory missing, using empty bundle");
        return Ok(ExpertBundle::default());
    }

    let config_path = dir.join("config.yaml");
    let config = if config_path.exists() {
        let content =
            std::fs::read_to_string(&config_path).context(format!("Failed to read {}", config_path.display()))?;
        serde_yaml::from_str(&content).context(format!("Failed to parse {}", config_path.display()))?
    } else {
        Value::Object(serde_json::Map::new())
    };

    let instructions_path = dir.join("instructions.md");
    let instructions = if instructions_path.exists() {
        std::fs::read_to_string(&instructions_path)
            .context(format!("Failed to read {}", instructions_path.display()))?
    } else {
        String::new()
    };

    Ok(ExpertBundle { config, instructions })
}
