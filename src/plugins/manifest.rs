//! Plugin manifest format (`omni.plugin.json`)

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::PeerTarget;

/// File name every plugin directory must contain
pub const MANIFEST_FILE: &str = "omni.plugin.json";

/// Plugin manifest describing a plugin and the capabilities it advertises
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin identifier (e.g. "omni.weather")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Semver version string
    pub version: String,
    /// Short description
    #[serde(default)]
    pub description: Option<String>,
    /// Plugin author
    #[serde(default)]
    pub author: Option<String>,
    /// Capability names this plugin answers for
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Entry point (relative path to executable or script)
    #[serde(default)]
    pub entry: Option<String>,
    /// Extra arguments for the entry point
    #[serde(default)]
    pub args: Vec<String>,
}

impl PluginManifest {
    /// Whether this plugin advertises the given capability
    #[must_use]
    pub fn provides(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Build the connection target for a plugin installed in `dir`
    #[must_use]
    pub fn to_target(&self, dir: &Path) -> PeerTarget {
        PeerTarget {
            id: self.id.clone(),
            name: self.name.clone(),
            location: dir.to_path_buf(),
            entry: self.entry.clone(),
            args: self.args.clone(),
        }
    }
}
