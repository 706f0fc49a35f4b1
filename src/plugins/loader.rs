//! Plugin loader facade

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::connection::PeerTransport;
use super::coordinator::Coordinator;
use super::discovery::CapabilityRegistry;
use super::handlers::PluginHandler;
use super::listeners::{ListenerId, LoadListener};
use super::types::{Capability, LoadReport, LoadState};
use crate::Result;

/// Loads every installed plugin advertising a capability
///
/// `connect` discovers the plugins and opens all of them concurrently. Each
/// plugin's outcome goes to the handler `H`. Once every plugin has answered
/// or failed, registered listeners are notified exactly once.
///
/// Cheap to clone; clones share the same cycle. Dropping the last clone
/// cancels a running cycle and releases its connections.
///
/// ```rust,ignore
/// let loader = PluginLoader::new(capability, registry, transport, MenuEntryCollector::new());
/// loader.subscribe(|report: &LoadReport| tracing::info!(resolved = report.resolved, "menu ready"));
/// loader.connect()?;
/// loader.settled().await;
/// let menu = loader.handler().entries();
/// ```
pub struct PluginLoader<H> {
    coordinator: Arc<Coordinator<H>>,
}

impl<H> Clone for PluginLoader<H> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<H: PluginHandler + 'static> PluginLoader<H> {
    /// Create a loader with no per-plugin timeout
    #[must_use]
    pub fn new(
        capability: Capability,
        registry: Arc<dyn CapabilityRegistry>,
        transport: Arc<dyn PeerTransport>,
        handler: H,
    ) -> Self {
        Self::with_options(capability, registry, transport, handler, None)
    }

    /// Create a loader, optionally failing plugins that take longer than `peer_timeout`
    #[must_use]
    pub fn with_options(
        capability: Capability,
        registry: Arc<dyn CapabilityRegistry>,
        transport: Arc<dyn PeerTransport>,
        handler: H,
        peer_timeout: Option<Duration>,
    ) -> Self {
        Self {
            coordinator: Arc::new(Coordinator::new(
                capability,
                registry,
                transport,
                handler,
                peer_timeout,
            )),
        }
    }

    /// Capability this loader was built for
    #[must_use]
    pub fn capability(&self) -> &Capability {
        self.coordinator.capability()
    }

    /// The handler receiving plugin outcomes
    #[must_use]
    pub fn handler(&self) -> &H {
        self.coordinator.handler()
    }

    /// Register a completion listener
    ///
    /// A listener added after the current cycle completed is not called for it.
    pub fn subscribe(&self, listener: impl LoadListener + 'static) -> ListenerId {
        let id = self.coordinator.listeners().subscribe(Arc::new(listener));
        tracing::debug!(capability = %self.capability(), listener = %id, "listener subscribed");
        id
    }

    /// Remove a completion listener, returning true if it was registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.coordinator.listeners().unsubscribe(id)
    }

    /// Remove every completion listener
    pub fn clear_listeners(&self) {
        self.coordinator.listeners().clear();
    }

    /// Discover plugins and connect to all of them
    ///
    /// Returns immediately. Returns `Ok(false)` without doing anything if a
    /// cycle is running or has already settled; call [`Self::reset`] first to
    /// run another one. A failing registry completes the cycle with no plugins.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Runtime`] if called outside a tokio runtime
    pub fn connect(&self) -> Result<bool> {
        self.coordinator.start()
    }

    /// Cancel the running cycle and release open connections
    ///
    /// Listeners are not notified and outcomes arriving later are discarded.
    /// An outcome the handler was already being given may still be delivered.
    /// Returns false if nothing was connecting.
    pub fn disconnect(&self) -> bool {
        self.coordinator.abort()
    }

    /// Return a completed or aborted loader to `NotStarted`
    ///
    /// Returns false while a cycle is still connecting.
    pub fn reset(&self) -> bool {
        self.coordinator.reset()
    }

    /// Whether the current cycle completed
    #[must_use]
    pub fn is_load_complete(&self) -> bool {
        self.state() == LoadState::Complete
    }

    /// State of the current cycle
    #[must_use]
    pub fn state(&self) -> LoadState {
        self.coordinator.state()
    }

    /// Receiver that observes every state transition
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<LoadState> {
        self.coordinator.watch_state()
    }

    /// Wait until the current cycle is complete or aborted
    ///
    /// Waits forever if `connect` is never called.
    pub async fn settled(&self) -> LoadState {
        let mut rx = self.watch_state();
        let settled = match rx.wait_for(|state| state.is_settled()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        settled
    }

    /// Report of the most recently completed cycle
    #[must_use]
    pub fn last_report(&self) -> Option<LoadReport> {
        self.coordinator.last_report()
    }
}

impl<H> fmt::Debug for PluginLoader<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader").finish_non_exhaustive()
    }
}
