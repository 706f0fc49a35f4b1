//! Shared test utilities

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use beacon_plugin_loader::{
    LoadReport, PeerFailure, PeerOutcome, PeerTarget, PeerTransport, PluginHandler, StaticRegistry,
};
use tokio::sync::{mpsc, oneshot};

pub const CAPABILITY: &str = "omni.menu.entries";

pub type Answer = Result<serde_json::Value, PeerFailure>;

/// Transport whose peers answer only when the test releases them
#[derive(Default)]
pub struct GatedTransport {
    gates: Mutex<HashMap<String, oneshot::Receiver<Answer>>>,
    opened: AtomicUsize,
    aborted: Mutex<Vec<String>>,
}

impl GatedTransport {
    /// Create a transport with one gate per id, returning the release handles
    pub fn new(ids: &[&str]) -> (Arc<Self>, HashMap<String, oneshot::Sender<Answer>>) {
        let transport = Self::default();
        let mut releases = HashMap::new();
        {
            let mut gates = transport.gates.lock().unwrap();
            for id in ids {
                let (tx, rx) = oneshot::channel();
                gates.insert((*id).to_string(), rx);
                releases.insert((*id).to_string(), tx);
            }
        }
        (Arc::new(transport), releases)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> Vec<String> {
        let mut aborted = self.aborted.lock().unwrap().clone();
        aborted.sort();
        aborted
    }
}

#[async_trait]
impl PeerTransport for GatedTransport {
    async fn open(&self, target: &PeerTarget) -> Answer {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().remove(&target.id);
        match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(PeerFailure::Unknown("gate dropped".to_string()))),
            None => Err(PeerFailure::Unreachable(format!("no gate for {}", target.id))),
        }
    }

    fn abort(&self, target: &PeerTarget) {
        self.aborted.lock().unwrap().push(target.id.clone());
    }
}

/// Transport answering every peer immediately with its id
pub struct EchoTransport;

#[async_trait]
impl PeerTransport for EchoTransport {
    async fn open(&self, target: &PeerTarget) -> Answer {
        Ok(serde_json::json!({ "id": target.id }))
    }
}

/// Handler that records outcomes and reports each one on a channel
pub struct RecordingHandler {
    outcomes: Mutex<Vec<(String, PeerOutcome)>>,
    all_resolved: AtomicUsize,
    events: mpsc::UnboundedSender<String>,
}

impl RecordingHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                outcomes: Mutex::new(Vec::new()),
                all_resolved: AtomicUsize::new(0),
                events: tx,
            },
            rx,
        )
    }

    pub fn ids(&self) -> Vec<String> {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn outcomes(&self) -> Vec<(String, PeerOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn all_resolved_calls(&self) -> usize {
        self.all_resolved.load(Ordering::SeqCst)
    }
}

impl PluginHandler for RecordingHandler {
    fn on_peer_resolved(&self, target: &PeerTarget, outcome: PeerOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .push((target.id.clone(), outcome));
        let _ = self.events.send(target.id.clone());
    }

    fn on_all_resolved(&self, _report: &LoadReport) {
        self.all_resolved.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send("<all>".to_string());
    }
}

/// Registry advertising the given ids for [`CAPABILITY`]
pub fn registry(ids: &[&str]) -> Arc<StaticRegistry> {
    let registry = ids.iter().fold(StaticRegistry::new(), |registry, id| {
        registry.with_target(CAPABILITY, PeerTarget::new(*id))
    });
    Arc::new(registry)
}

/// Listener counter
pub fn counter() -> (Arc<AtomicUsize>, impl Fn(&LoadReport) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&count);
    (count, move |_: &LoadReport| {
        inner.fetch_add(1, Ordering::SeqCst);
    })
}

/// Write a plugin directory with a manifest and a shell entry point
pub fn write_plugin(root: &Path, dir: &str, id: &str, capability: &str, script: &str) {
    let plugin_dir = root.join(dir);
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(
        plugin_dir.join("omni.plugin.json"),
        serde_json::json!({
            "id": id,
            "name": id,
            "version": "1.0.0",
            "capabilities": [capability],
            "entry": "entry.sh",
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(plugin_dir.join("entry.sh"), script).unwrap();
}
