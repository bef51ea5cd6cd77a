//! Configuration loading and database path resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the ledger database
pub const DATABASE_ENV_VAR: &str = "HL_DATABASE";

/// File name of the ledger database inside the data directory
const DATABASE_FILE_NAME: &str = "highlander.db";

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    /// Path of the SQLite database
    pub database: Option<PathBuf>,
    /// Default acting username for command line use
    pub username: Option<String>,
}

impl FileConfig {
    /// Parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }
}

/// Database path resolution, in priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default
pub fn resolve_database_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    if let Ok(config_path) = find_config_file() {
        let config = FileConfig::load(&config_path)?;
        if let Some(database) = config.database {
            return Ok(database);
        }
    }

    Ok(default_data_dir().join(DATABASE_FILE_NAME))
}

/// Locate the configuration file for the platform
pub fn find_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("highlander").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/highlander/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// OS-dependent default data folder
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("highlander"))
        .unwrap_or_else(|| PathBuf::from("./highlander_data"))
}
