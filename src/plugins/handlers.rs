//! Per-plugin payload interpretation
//!
//! A [`PluginHandler`] decides what a plugin's answer means. Within one cycle
//! calls are serialized: `on_peer_resolved` once per discovered plugin, then
//! `on_all_resolved` once. A call from a cycle that was disconnected may still
//! be running when the next cycle starts, so shared state needs its own lock.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::types::{LoadReport, PeerOutcome, PeerTarget};

/// Extension point interpreting each plugin's outcome
pub trait PluginHandler: Send + Sync {
    /// Called once for every discovered plugin, with its terminal outcome
    fn on_peer_resolved(&self, target: &PeerTarget, outcome: PeerOutcome);

    /// Called once after the last plugin resolved, before listeners run
    fn on_all_resolved(&self, _report: &LoadReport) {}
}

/// Records every outcome in arrival order
#[derive(Debug, Default)]
pub struct PayloadCollector {
    outcomes: Mutex<Vec<(PeerTarget, PeerOutcome)>>,
}

impl PayloadCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes received so far
    #[must_use]
    pub fn outcomes(&self) -> Vec<(PeerTarget, PeerOutcome)> {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Successful payloads keyed by plugin id
    #[must_use]
    pub fn payloads(&self) -> Vec<(String, serde_json::Value)> {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter_map(|(target, outcome)| {
                outcome
                    .payload()
                    .map(|value| (target.id.clone(), value.clone()))
            })
            .collect()
    }

    /// Forget everything collected so far
    pub fn clear(&self) {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

impl PluginHandler for PayloadCollector {
    fn on_peer_resolved(&self, target: &PeerTarget, outcome: PeerOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((target.clone(), outcome));
    }
}

/// A menu entry contributed by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    /// Text shown to the user
    pub label: String,
    /// Action identifier the host dispatches on selection
    pub action: String,
    /// Sort key, lower first
    #[serde(default)]
    pub order: i32,
    /// Plugin that contributed the entry
    #[serde(default)]
    pub plugin_id: String,
}

#[derive(Debug, Deserialize)]
struct MenuPayload {
    entries: Vec<MenuEntry>,
}

/// Aggregates `{"entries": [...]}` payloads into one sorted menu
///
/// Failed plugins and malformed payloads contribute nothing.
#[derive(Debug, Default)]
pub struct MenuEntryCollector {
    entries: Mutex<Vec<MenuEntry>>,
}

impl MenuEntryCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries collected so far; sorted once the cycle completes
    #[must_use]
    pub fn entries(&self) -> Vec<MenuEntry> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl PluginHandler for MenuEntryCollector {
    fn on_peer_resolved(&self, target: &PeerTarget, outcome: PeerOutcome) {
        let value = match outcome {
            PeerOutcome::Payload(value) => value,
            PeerOutcome::Failure(failure) => {
                tracing::warn!(plugin_id = %target.id, error = %failure, "plugin contributed no menu entries");
                return;
            }
        };

        let payload = match serde_json::from_value::<MenuPayload>(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(plugin_id = %target.id, error = %e, "invalid menu payload");
                return;
            }
        };

        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.extend(payload.entries.into_iter().map(|mut entry| {
            entry.plugin_id.clone_from(&target.id);
            entry
        }));
    }

    fn on_all_resolved(&self, report: &LoadReport) {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.label.cmp(&b.label))
                .then_with(|| a.plugin_id.cmp(&b.plugin_id))
        });
        tracing::info!(
            capability = %report.capability,
            entries = entries.len(),
            "menu assembled"
        );
    }
}
