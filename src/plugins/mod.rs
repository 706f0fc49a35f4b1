//! Plugin system: capability discovery and aggregated loading
//!
//! Plugins are discovered from `omni.plugin.json` manifests in standard
//! directories. Each plugin declares the capabilities it answers for. A
//! [`PluginLoader`] connects to every plugin advertising a capability at
//! once and reports a single completion when all of them have answered.

mod coordinator;
pub mod connection;
pub mod discovery;
pub mod handlers;
pub mod listeners;
pub mod loader;
pub mod manifest;
pub mod process;
pub mod types;

pub use connection::{CallbackTransport, PeerConnector, PeerSignal, PeerTransport, open_peer};
pub use discovery::{CapabilityRegistry, ManifestRegistry, StaticRegistry, default_plugin_dirs};
pub use handlers::{MenuEntry, MenuEntryCollector, PayloadCollector, PluginHandler};
pub use listeners::{ListenerId, ListenerSet, LoadListener};
pub use loader::PluginLoader;
pub use manifest::{MANIFEST_FILE, PluginManifest};
pub use process::ProcessTransport;
pub use types::{Capability, LoadReport, LoadState, PeerFailure, PeerOutcome, PeerTarget};
