//! Peer connections - one request/response exchange with a single plugin
//!
//! A [`PeerTransport`] yields exactly one terminal outcome per target.
//! Transports that report through callbacks can implement [`PeerConnector`]
//! instead and be wrapped in [`CallbackTransport`]; their [`PeerSignal`]
//! collapses duplicate notifications into the first one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::types::{PeerFailure, PeerOutcome, PeerTarget};

/// Point-to-point channel to a single plugin
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Connect to `target` and return its payload
    ///
    /// # Errors
    ///
    /// Returns the [`PeerFailure`] describing why no payload was produced
    async fn open(&self, target: &PeerTarget) -> Result<serde_json::Value, PeerFailure>;

    /// Release whatever is still held for `target`
    ///
    /// Called on disconnect for connections that have not produced an outcome.
    fn abort(&self, _target: &PeerTarget) {}
}

/// Open one peer, applying the optional timeout
pub async fn open_peer(
    transport: &dyn PeerTransport,
    target: &PeerTarget,
    peer_timeout: Option<Duration>,
) -> PeerOutcome {
    let result = match peer_timeout {
        Some(limit) => tokio::time::timeout(limit, transport.open(target))
            .await
            .unwrap_or(Err(PeerFailure::Timeout(limit))),
        None => transport.open(target).await,
    };

    match &result {
        Ok(_) => tracing::debug!(plugin_id = %target.id, "peer answered"),
        Err(e) => tracing::debug!(plugin_id = %target.id, error = %e, "peer failed"),
    }

    result.into()
}

/// Exactly-once outcome slot for one peer
///
/// Cloneable so a callback-driven transport can hand it to several
/// notification paths. The first [`PeerSignal::resolve`] wins.
#[derive(Debug, Clone)]
pub struct PeerSignal {
    plugin_id: Arc<str>,
    slot: Arc<Mutex<Option<oneshot::Sender<PeerOutcome>>>>,
}

impl PeerSignal {
    /// Create a signal and the receiver its outcome is delivered to
    #[must_use]
    pub fn new(plugin_id: &str) -> (Self, oneshot::Receiver<PeerOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                plugin_id: Arc::from(plugin_id),
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver the terminal outcome
    ///
    /// Returns false if an outcome was already delivered; the duplicate is dropped.
    pub fn resolve(&self, outcome: PeerOutcome) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();

        let Some(sender) = sender else {
            tracing::trace!(plugin_id = %self.plugin_id, "duplicate peer notification suppressed");
            return false;
        };

        // A closed receiver means the cycle was torn down; the outcome is moot
        drop(sender.send(outcome));
        true
    }

    /// Whether an outcome has already been delivered
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_none()
    }
}

/// Callback-style connection initiator
///
/// `connect` must return promptly; the outcome is reported later through
/// the signal, from any thread.
pub trait PeerConnector: Send + Sync {
    /// Start connecting to `target`
    fn connect(&self, target: &PeerTarget, signal: PeerSignal);

    /// Release whatever is still held for `target`
    fn abort(&self, _target: &PeerTarget) {}
}

/// Adapts a [`PeerConnector`] into a [`PeerTransport`]
#[derive(Debug, Clone)]
pub struct CallbackTransport<C> {
    connector: C,
}

impl<C: PeerConnector> CallbackTransport<C> {
    /// Wrap a callback-style connector
    #[must_use]
    pub const fn new(connector: C) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl<C: PeerConnector> PeerTransport for CallbackTransport<C> {
    async fn open(&self, target: &PeerTarget) -> Result<serde_json::Value, PeerFailure> {
        let (signal, rx) = PeerSignal::new(&target.id);
        self.connector.connect(target, signal);

        match rx.await {
            Ok(PeerOutcome::Payload(value)) => Ok(value),
            Ok(PeerOutcome::Failure(failure)) => Err(failure),
            Err(_) => Err(PeerFailure::Unknown(
                "connection dropped without an outcome".to_string(),
            )),
        }
    }

    fn abort(&self, target: &PeerTarget) {
        self.connector.abort(target);
    }
}
