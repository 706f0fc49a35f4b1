//! Capability discovery - resolve a capability name to installed plugins

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::manifest::{MANIFEST_FILE, PluginManifest};
use super::types::{Capability, PeerTarget};
use crate::{Error, Result};

/// Source of truth for which installed plugins implement a capability
pub trait CapabilityRegistry: Send + Sync {
    /// Enumerate the targets currently installed for `capability`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the registry cannot be queried
    fn discover(&self, capability: &Capability) -> Result<Vec<PeerTarget>>;
}

/// Registry backed by `omni.plugin.json` manifests on disk
///
/// Looks for manifests in immediate subdirectories of each search path.
#[derive(Debug, Clone)]
pub struct ManifestRegistry {
    dirs: Vec<PathBuf>,
}

impl ManifestRegistry {
    /// Create a registry over the given search directories
    #[must_use]
    pub const fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Search directories, in priority order
    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Scan every search directory for valid manifests
    ///
    /// Returns `(directory, manifest)` pairs ordered by search directory and
    /// then by plugin directory name. Missing search directories are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if a search directory exists but cannot be read
    pub fn scan(&self) -> Result<Vec<(PathBuf, PluginManifest)>> {
        let mut results = Vec::new();

        for dir in &self.dirs {
            if !dir.is_dir() {
                tracing::debug!(path = %dir.display(), "plugin directory does not exist, skipping");
                continue;
            }

            let entries = std::fs::read_dir(dir).map_err(|e| {
                Error::Discovery(format!("failed to read {}: {e}", dir.display()))
            })?;

            let mut plugin_dirs: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect();
            plugin_dirs.sort();

            for path in plugin_dirs {
                if let Some(manifest) = load_manifest(&path.join(MANIFEST_FILE)) {
                    tracing::debug!(
                        plugin_id = %manifest.id,
                        path = %path.display(),
                        "discovered plugin"
                    );
                    results.push((path, manifest));
                }
            }
        }

        Ok(results)
    }
}

impl CapabilityRegistry for ManifestRegistry {
    fn discover(&self, capability: &Capability) -> Result<Vec<PeerTarget>> {
        let targets: Vec<PeerTarget> = self
            .scan()?
            .into_iter()
            .filter(|(_, manifest)| manifest.provides(capability.as_str()))
            .map(|(path, manifest)| manifest.to_target(&path))
            .collect();

        tracing::debug!(
            capability = %capability,
            count = targets.len(),
            "resolved capability"
        );

        Ok(targets)
    }
}

impl Default for ManifestRegistry {
    fn default() -> Self {
        Self::new(default_plugin_dirs())
    }
}

/// Load and parse a single manifest file
fn load_manifest(path: &Path) -> Option<PluginManifest> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<PluginManifest>(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse plugin manifest"
            );
            None
        }
    }
}

/// Default plugin search directories
#[must_use]
pub fn default_plugin_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Some(base) = directories::BaseDirs::new() {
        dirs.push(base.config_dir().join("omni").join("plugins"));
        dirs.push(base.data_dir().join("omni").join("plugins"));
    }

    dirs
}

/// In-memory registry for embedding hosts and tests
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    targets: HashMap<String, Vec<PeerTarget>>,
    unavailable: bool,
}

impl StaticRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry whose every query fails
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            targets: HashMap::new(),
            unavailable: true,
        }
    }

    /// Add a target for a capability, preserving insertion order
    #[must_use]
    pub fn with_target(mut self, capability: &str, target: PeerTarget) -> Self {
        self.targets
            .entry(capability.to_string())
            .or_default()
            .push(target);
        self
    }
}

impl CapabilityRegistry for StaticRegistry {
    fn discover(&self, capability: &Capability) -> Result<Vec<PeerTarget>> {
        if self.unavailable {
            return Err(Error::Discovery("registry unavailable".to_string()));
        }
        Ok(self
            .targets
            .get(capability.as_str())
            .cloned()
            .unwrap_or_default())
    }
}
