//! Configuration management for the plugin loader

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::plugins::default_plugin_dirs;
use crate::{Error, Result};

/// Loader configuration
///
/// Precedence: environment > TOML file > defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Directories scanned for plugin manifests
    /// Set via `BEACON_PLUGIN_DIRS` (platform path-list separator)
    pub plugin_dirs: Vec<PathBuf>,

    /// Per-plugin timeout; `None` waits forever
    /// Set via `BEACON_PLUGIN_TIMEOUT_SECS`
    pub peer_timeout: Option<Duration>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: default_plugin_dirs(),
            peer_timeout: None,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if an environment override is malformed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(
            std::env::var_os("BEACON_PLUGIN_DIRS"),
            std::env::var("BEACON_PLUGIN_TIMEOUT_SECS").ok(),
            fc,
        )
    }

    fn resolve(
        env_dirs: Option<std::ffi::OsString>,
        env_timeout: Option<String>,
        fc: file::LoaderConfigFile,
    ) -> Result<Self> {
        let defaults = Self::default();

        let plugin_dirs = match env_dirs {
            Some(raw) => std::env::split_paths(&raw).collect(),
            None => fc.plugins.dirs.map_or(defaults.plugin_dirs, |dirs| {
                dirs.iter().map(|d| expand_home(d)).collect()
            }),
        };

        let timeout_secs = match env_timeout {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("invalid BEACON_PLUGIN_TIMEOUT_SECS '{raw}': {e}"))
            })?),
            None => fc.plugins.timeout_secs,
        };

        // Zero means "no timeout", same as leaving it unset
        let peer_timeout = timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            plugin_dirs,
            peer_timeout,
        })
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(base) = directories::BaseDirs::new()
    {
        return base.home_dir().join(rest);
    }
    PathBuf::from(path)
}
