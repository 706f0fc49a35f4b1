//! Fan-out/fan-in over every plugin discovered for a capability
//!
//! One connect cycle:
//!
//! ```text
//! discover ──► spawn one task per target ──► outcomes ──► collector task
//!                                                              │
//!                              last outcome: teardown, on_all_resolved,
//!                              listeners (insertion order), Complete
//! ```
//!
//! Peer tasks push `(cycle, slot, outcome)` onto a channel drained by a single
//! collector task. The collector validates each outcome against the cycle
//! state under one mutex: the cycle must be current and still connecting, and
//! the slot must still be in flight. Removing the slot and decrementing the
//! pending count happen in that same section, so every target is counted
//! exactly once and completion is declared exactly once. `disconnect` takes
//! the same lock. Handlers and listeners always run with no lock held, and a
//! panic in one of them is logged without stalling the cycle.
//!
//! The collector only holds a weak reference. Dropping the last loader handle
//! aborts every in-flight connection.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use super::connection::{PeerTransport, open_peer};
use super::discovery::CapabilityRegistry;
use super::handlers::PluginHandler;
use super::listeners::{LoadListener, ListenerSet};
use super::types::{Capability, LoadReport, LoadState, PeerOutcome, PeerTarget};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    /// Completion declared; listeners are being notified
    Finishing,
    Complete,
    Aborted,
}

impl Phase {
    const fn state(self) -> LoadState {
        match self {
            Self::Idle => LoadState::NotStarted,
            Self::Connecting | Self::Finishing => LoadState::Connecting,
            Self::Complete => LoadState::Complete,
            Self::Aborted => LoadState::Aborted,
        }
    }
}

/// A peer connection that has not produced an outcome yet
struct InFlight {
    target: PeerTarget,
    task: AbortHandle,
}

struct Arrival {
    cycle: u64,
    slot: usize,
    outcome: PeerOutcome,
}

/// Everything a completing cycle hands to the notification phase
struct Completion {
    cycle: u64,
    report: LoadReport,
    leftovers: Vec<InFlight>,
    listeners: Vec<Arc<dyn LoadListener>>,
}

/// Mutable cycle state; the only data shared between execution contexts
struct Cycle {
    phase: Phase,
    number: u64,
    pending: usize,
    in_flight: HashMap<usize, InFlight>,
    collector: Option<AbortHandle>,
    report: Option<LoadReport>,
    last_report: Option<LoadReport>,
}

/// Drives connect cycles for one capability
pub struct Coordinator<H> {
    capability: Capability,
    registry: Arc<dyn CapabilityRegistry>,
    transport: Arc<dyn PeerTransport>,
    handler: H,
    peer_timeout: Option<Duration>,
    listeners: Mutex<ListenerSet>,
    cycle: Mutex<Cycle>,
    state_tx: watch::Sender<LoadState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Run plugin-supplied code, logging a panic instead of unwinding into the cycle
fn guarded(capability: &Capability, what: &str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(capability = %capability, callback = what, panic = %message, "callback panicked");
    }
}

impl<H: PluginHandler + 'static> Coordinator<H> {
    /// Create an idle coordinator
    pub fn new(
        capability: Capability,
        registry: Arc<dyn CapabilityRegistry>,
        transport: Arc<dyn PeerTransport>,
        handler: H,
        peer_timeout: Option<Duration>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LoadState::NotStarted);
        Self {
            capability,
            registry,
            transport,
            handler,
            peer_timeout,
            listeners: Mutex::new(ListenerSet::new()),
            cycle: Mutex::new(Cycle {
                phase: Phase::Idle,
                number: 0,
                pending: 0,
                in_flight: HashMap::new(),
                collector: None,
                report: None,
                last_report: None,
            }),
            state_tx,
        }
    }

    pub const fn capability(&self) -> &Capability {
        &self.capability
    }

    pub const fn handler(&self) -> &H {
        &self.handler
    }

    pub fn listeners(&self) -> MutexGuard<'_, ListenerSet> {
        lock(&self.listeners)
    }

    pub fn state(&self) -> LoadState {
        lock(&self.cycle).phase.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoadState> {
        self.state_tx.subscribe()
    }

    pub fn last_report(&self) -> Option<LoadReport> {
        lock(&self.cycle).last_report.clone()
    }

    fn set_phase(&self, cycle: &mut Cycle, phase: Phase) {
        cycle.phase = phase;
        self.state_tx.send_replace(phase.state());
    }

    /// Start a cycle if the loader is idle
    ///
    /// Returns false when a cycle is running or already settled.
    pub fn start(self: &Arc<Self>) -> Result<bool> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("connect requires a tokio runtime: {e}")))?;

        let number = {
            let mut cycle = lock(&self.cycle);
            if cycle.phase != Phase::Idle {
                tracing::debug!(
                    capability = %self.capability,
                    state = %cycle.phase.state(),
                    "connect ignored"
                );
                return Ok(false);
            }
            cycle.number += 1;
            cycle.report = Some(LoadReport::new(self.capability.clone(), cycle.number));
            self.set_phase(&mut cycle, Phase::Connecting);
            cycle.number
        };

        // Discovery runs unlocked; a disconnect in the meantime wins
        let discovered = self.registry.discover(&self.capability);

        let mut cycle = lock(&self.cycle);
        if cycle.number != number || cycle.phase != Phase::Connecting {
            tracing::debug!(capability = %self.capability, cycle = number, "cycle cancelled during discovery");
            return Ok(true);
        }

        let targets = match discovered {
            Ok(targets) => targets,
            Err(e) => {
                tracing::warn!(
                    capability = %self.capability,
                    error = %e,
                    "discovery failed, completing with no plugins"
                );
                if let Some(report) = cycle.report.as_mut() {
                    report.discovery_error = Some(e.to_string());
                }
                Vec::new()
            }
        };

        tracing::info!(
            capability = %self.capability,
            cycle = number,
            plugins = targets.len(),
            "connecting to plugins"
        );

        if let Some(report) = cycle.report.as_mut() {
            report.discovered = targets.len();
        }
        cycle.pending = targets.len();

        if targets.is_empty() {
            let completion = self.declare_complete(&mut cycle);
            drop(cycle);
            self.notify(completion);
            return Ok(true);
        }

        let (tx, rx) = mpsc::unbounded_channel();

        for (slot, target) in targets.into_iter().enumerate() {
            let tx = tx.clone();
            let transport = Arc::clone(&self.transport);
            let peer_timeout = self.peer_timeout;
            let task_target = target.clone();
            let task = runtime.spawn(async move {
                let outcome = open_peer(transport.as_ref(), &task_target, peer_timeout).await;
                // Closed channel: the cycle was torn down
                drop(tx.send(Arrival {
                    cycle: number,
                    slot,
                    outcome,
                }));
            });
            cycle.in_flight.insert(
                slot,
                InFlight {
                    target,
                    task: task.abort_handle(),
                },
            );
        }
        drop(tx);

        let collector = runtime.spawn(Self::collect(Arc::downgrade(self), rx));
        cycle.collector = Some(collector.abort_handle());

        Ok(true)
    }

    async fn collect(coordinator: Weak<Self>, mut rx: mpsc::UnboundedReceiver<Arrival>) {
        while let Some(arrival) = rx.recv().await {
            let Some(coordinator) = coordinator.upgrade() else {
                break;
            };
            if coordinator.accept(arrival) {
                break;
            }
        }
    }

    /// Process one arrival; returns true once the cycle is done
    fn accept(&self, arrival: Arrival) -> bool {
        let (target, completion) = {
            let mut cycle = lock(&self.cycle);
            if cycle.number != arrival.cycle || cycle.phase != Phase::Connecting {
                tracing::trace!(cycle = arrival.cycle, slot = arrival.slot, "discarding stale outcome");
                return true;
            }
            let Some(entry) = cycle.in_flight.remove(&arrival.slot) else {
                tracing::trace!(cycle = arrival.cycle, slot = arrival.slot, "discarding duplicate outcome");
                return false;
            };

            cycle.pending = cycle.pending.saturating_sub(1);
            if let Some(report) = cycle.report.as_mut() {
                report.record(&entry.target, &arrival.outcome);
            }

            let completion = (cycle.pending == 0).then(|| self.declare_complete(&mut cycle));
            (entry.target, completion)
        };

        tracing::debug!(
            capability = %self.capability,
            plugin_id = %target.id,
            ok = arrival.outcome.is_payload(),
            "plugin resolved"
        );
        // Accepted above, so still delivered if a disconnect lands from here on
        guarded(&self.capability, "on_peer_resolved", || {
            self.handler.on_peer_resolved(&target, arrival.outcome);
        });

        match completion {
            Some(completion) => {
                self.notify(completion);
                true
            }
            None => false,
        }
    }

    /// Move to `Finishing` and detach everything the notification phase needs
    fn declare_complete(&self, cycle: &mut Cycle) -> Completion {
        self.set_phase(cycle, Phase::Finishing);
        let mut report = cycle
            .report
            .take()
            .unwrap_or_else(|| LoadReport::new(self.capability.clone(), cycle.number));
        report.finished_at = Utc::now();

        Completion {
            cycle: cycle.number,
            report,
            leftovers: cycle.in_flight.drain().map(|(_, entry)| entry).collect(),
            listeners: self.listeners().snapshot(),
        }
    }

    fn notify(&self, completion: Completion) {
        let Completion {
            cycle: number,
            report,
            leftovers,
            listeners,
        } = completion;

        self.release(leftovers);

        guarded(&self.capability, "on_all_resolved", || {
            self.handler.on_all_resolved(&report);
        });
        for listener in &listeners {
            guarded(&self.capability, "plugins_loaded", || {
                listener.plugins_loaded(&report);
            });
        }

        tracing::info!(
            capability = %self.capability,
            cycle = number,
            resolved = report.resolved,
            failed = report.failed,
            listeners = listeners.len(),
            "plugin load complete"
        );

        let mut cycle = lock(&self.cycle);
        if cycle.number == number && cycle.phase == Phase::Finishing {
            cycle.last_report = Some(report);
            cycle.collector = None;
            self.set_phase(&mut cycle, Phase::Complete);
        }
    }

    fn release(&self, connections: Vec<InFlight>) {
        release_connections(&self.capability, self.transport.as_ref(), connections);
    }

    /// Cancel a running cycle
    ///
    /// Returns false if no cycle was connecting. Listeners are not notified.
    pub fn abort(&self) -> bool {
        let (leftovers, collector) = {
            let mut cycle = lock(&self.cycle);
            if cycle.phase != Phase::Connecting {
                return false;
            }
            self.set_phase(&mut cycle, Phase::Aborted);
            cycle.pending = 0;
            cycle.report = None;
            let leftovers: Vec<InFlight> = cycle.in_flight.drain().map(|(_, entry)| entry).collect();
            (leftovers, cycle.collector.take())
        };

        tracing::info!(
            capability = %self.capability,
            outstanding = leftovers.len(),
            "plugin load aborted"
        );

        if let Some(collector) = collector {
            collector.abort();
        }
        self.release(leftovers);
        true
    }

    /// Return a settled loader to `NotStarted`
    pub fn reset(&self) -> bool {
        let mut cycle = lock(&self.cycle);
        match cycle.phase {
            Phase::Complete | Phase::Aborted => {
                self.set_phase(&mut cycle, Phase::Idle);
                true
            }
            Phase::Idle => true,
            Phase::Connecting | Phase::Finishing => false,
        }
    }
}

fn release_connections(
    capability: &Capability,
    transport: &dyn PeerTransport,
    connections: Vec<InFlight>,
) {
    for InFlight { target, task } in connections {
        tracing::debug!(plugin_id = %target.id, "releasing plugin connection");
        task.abort();
        guarded(capability, "abort", || transport.abort(&target));
    }
}

impl<H> Drop for Coordinator<H> {
    fn drop(&mut self) {
        let cycle = self
            .cycle
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(collector) = cycle.collector.take() {
            collector.abort();
        }
        let leftovers: Vec<InFlight> = cycle.in_flight.drain().map(|(_, entry)| entry).collect();
        if !leftovers.is_empty() {
            tracing::debug!(
                capability = %self.capability,
                outstanding = leftovers.len(),
                "loader dropped mid-cycle"
            );
            release_connections(&self.capability, self.transport.as_ref(), leftovers);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::plugins::discovery::StaticRegistry;
    use crate::plugins::handlers::PayloadCollector;
    use crate::plugins::types::PeerFailure;

    struct Echo;

    #[async_trait]
    impl PeerTransport for Echo {
        async fn open(&self, target: &PeerTarget) -> std::result::Result<serde_json::Value, PeerFailure> {
            Ok(serde_json::json!({ "id": target.id }))
        }
    }

    fn coordinator(registry: StaticRegistry) -> Arc<Coordinator<PayloadCollector>> {
        Arc::new(Coordinator::new(
            Capability::new("omni.menu").unwrap(),
            Arc::new(registry),
            Arc::new(Echo),
            PayloadCollector::new(),
            None,
        ))
    }

    #[test]
    fn start_outside_runtime_fails() {
        let coordinator = coordinator(StaticRegistry::new());
        assert!(matches!(coordinator.start(), Err(Error::Runtime(_))));
        assert_eq!(coordinator.state(), LoadState::NotStarted);
    }

    #[tokio::test]
    async fn stale_arrival_is_discarded() {
        let registry = StaticRegistry::new().with_target("omni.menu", PeerTarget::new("a"));
        let coordinator = coordinator(registry);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        coordinator
            .listeners()
            .subscribe(Arc::new(move |_: &LoadReport| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));

        assert!(coordinator.start().unwrap());
        let mut rx = coordinator.watch_state();
        rx.wait_for(|s| s.is_settled()).await.unwrap();

        // A late arrival from the finished cycle must not touch anything
        let done = coordinator.accept(Arrival {
            cycle: 1,
            slot: 0,
            outcome: PeerOutcome::Payload(serde_json::Value::Null),
        });
        assert!(done);
        assert_eq!(coordinator.handler().outcomes().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Panicky;

    impl PluginHandler for Panicky {
        fn on_peer_resolved(&self, target: &PeerTarget, _outcome: PeerOutcome) {
            assert_ne!(target.id, "b", "handler rejects b");
        }

        fn on_all_resolved(&self, _report: &LoadReport) {
            panic!("on_all_resolved failed");
        }
    }

    fn failing_listener(_: &LoadReport) {
        panic!("listener failed");
    }

    #[tokio::test]
    async fn panicking_callbacks_still_complete() {
        let registry = StaticRegistry::new()
            .with_target("omni.menu", PeerTarget::new("a"))
            .with_target("omni.menu", PeerTarget::new("b"));
        let coordinator = Arc::new(Coordinator::new(
            Capability::new("omni.menu").unwrap(),
            Arc::new(registry),
            Arc::new(Echo),
            Panicky,
            None,
        ));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        {
            let mut listeners = coordinator.listeners();
            listeners.subscribe(Arc::new(failing_listener));
            listeners.subscribe(Arc::new(move |_: &LoadReport| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(coordinator.start().unwrap());
        let mut rx = coordinator.watch_state();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_settled()))
            .await
            .expect("cycle stalled after a panic")
            .unwrap();

        assert_eq!(coordinator.state(), LoadState::Complete);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.last_report().unwrap().resolved, 2);
        assert!(coordinator.reset());
    }

    #[tokio::test]
    async fn reset_only_when_settled() {
        let coordinator = coordinator(StaticRegistry::new());
        assert!(coordinator.reset());

        assert!(coordinator.start().unwrap());
        assert_eq!(coordinator.state(), LoadState::Complete);
        assert!(coordinator.reset());
        assert_eq!(coordinator.state(), LoadState::NotStarted);

        assert!(coordinator.start().unwrap());
        assert_eq!(coordinator.last_report().unwrap().cycle, 2);
    }
}
