//! Beacon Plugin Loader - capability-based plugin discovery and aggregation
//!
//! This library finds every installed plugin that advertises a capability,
//! talks to all of them concurrently, and reports one completion event once
//! each plugin has either answered or failed:
//! - Capability discovery from `omni.plugin.json` manifests
//! - Per-plugin connections with exactly-once outcomes (subprocess transport included)
//! - A fan-out/fan-in coordinator with an optional per-plugin timeout
//! - Completion listeners notified exactly once per cycle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   PluginLoader                       │
//! │   connect  │  disconnect  │  reset  │  listeners    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Coordinator                        │
//! │   discover  │  fan-out  │  collect  │  complete     │
//! └───────┬────────────────────────────────┬────────────┘
//!         │                                │
//! ┌───────▼──────────────┐      ┌──────────▼────────────┐
//! │  CapabilityRegistry  │      │    PeerTransport       │
//! │  manifests on disk   │      │  subprocess / custom   │
//! └──────────────────────┘      └───────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod plugins;

pub use config::LoaderConfig;
pub use error::{Error, Result};
pub use plugins::{
    CallbackTransport, Capability, CapabilityRegistry, ListenerId, LoadListener, LoadReport,
    LoadState, ManifestRegistry, MenuEntry, MenuEntryCollector, PayloadCollector, PeerConnector,
    PeerFailure, PeerOutcome, PeerSignal, PeerTarget, PeerTransport, PluginHandler, PluginLoader,
    PluginManifest, ProcessTransport, StaticRegistry,
};
