//! TOML configuration file loading
//!
//! Supports `~/.config/omni/plugins/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LoaderConfigFile {
    /// Plugin discovery and connection settings
    #[serde(default)]
    pub plugins: PluginsFileConfig,
}

/// `[plugins]` table
#[derive(Debug, Default, Deserialize)]
pub struct PluginsFileConfig {
    /// Directories scanned for plugin manifests, in priority order
    pub dirs: Option<Vec<String>>,

    /// Seconds a single plugin may take before it counts as failed
    pub timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LoaderConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LoaderConfigFile {
    let Some(path) = config_file_path() else {
        return LoaderConfigFile::default();
    };

    if !path.exists() {
        return LoaderConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            LoaderConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<LoaderConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/omni/plugins/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("plugins")
            .join("config.toml")
    })
}
