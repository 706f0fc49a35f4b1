//! Completion listeners

use std::fmt;
use std::sync::Arc;

use super::types::LoadReport;

/// Observer notified once when a connect cycle completes
pub trait LoadListener: Send + Sync {
    /// Called after every discovered plugin produced an outcome
    fn plugins_loaded(&self, report: &LoadReport);
}

impl<F> LoadListener for F
where
    F: Fn(&LoadReport) + Send + Sync,
{
    fn plugins_loaded(&self, report: &LoadReport) {
        self(report);
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Ordered set of completion listeners
#[derive(Default)]
pub struct ListenerSet {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn LoadListener>)>,
}

impl ListenerSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener at the end of the notification order
    pub fn subscribe(&mut self, listener: Arc<dyn LoadListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener, returning true if it was present
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Listeners in insertion order, detached from the set
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn LoadListener>> {
        self.listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Drop every listener
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Number of listeners
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listeners are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
