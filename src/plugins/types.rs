//! Core value types shared by the registry, transports and coordinator

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Name of a capability that installed plugins may advertise
///
/// Always non-empty. Supplied once when a loader is built and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability(String);

impl Capability {
    /// Create a capability name
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCapability`] if the name is empty or only whitespace
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::InvalidCapability(
                "capability name must not be empty".to_string(),
            ));
        }
        Ok(Self(name))
    }

    /// The capability name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Capability {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        value.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One discovered plugin believed to implement a capability
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerTarget {
    /// Plugin identifier (e.g. "omni.weather")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Directory the plugin was discovered in
    pub location: PathBuf,
    /// Entry point relative to `location`
    #[serde(default)]
    pub entry: Option<String>,
    /// Extra arguments passed to the entry point
    #[serde(default)]
    pub args: Vec<String>,
}

impl PeerTarget {
    /// Create a target with only an identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            location: PathBuf::new(),
            entry: None,
            args: Vec::new(),
        }
    }

    /// Set the human-readable name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the directory the plugin lives in
    #[must_use]
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = location.into();
        self
    }

    /// Set the entry point, relative to the location
    #[must_use]
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    /// Absolute path of the entry point, if one is declared
    #[must_use]
    pub fn entry_path(&self) -> Option<PathBuf> {
        self.entry.as_ref().map(|entry| self.location.join(entry))
    }
}

/// Why a single peer failed to produce a payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PeerFailure {
    /// The peer could not be reached or started
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// The peer was reached but refused the request
    #[error("peer rejected request: {0}")]
    Rejected(String),

    /// The peer answered with something that is not a valid payload
    #[error("peer protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// The peer did not answer in time
    #[error("peer timed out after {0:?}")]
    Timeout(Duration),

    /// Anything else
    #[error("peer failed: {0}")]
    Unknown(String),
}

/// Terminal outcome of one peer connection attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum PeerOutcome {
    /// The peer answered with a payload
    Payload(serde_json::Value),
    /// The peer failed permanently
    Failure(PeerFailure),
}

impl PeerOutcome {
    /// Whether this outcome carries a payload
    #[must_use]
    pub const fn is_payload(&self) -> bool {
        matches!(self, Self::Payload(_))
    }

    /// The payload, if any
    #[must_use]
    pub const fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Payload(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// The failure, if any
    #[must_use]
    pub const fn failure(&self) -> Option<&PeerFailure> {
        match self {
            Self::Payload(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }
}

impl From<std::result::Result<serde_json::Value, PeerFailure>> for PeerOutcome {
    fn from(result: std::result::Result<serde_json::Value, PeerFailure>) -> Self {
        match result {
            Ok(value) => Self::Payload(value),
            Err(failure) => Self::Failure(failure),
        }
    }
}

/// Lifecycle of a loader's current connect cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// `connect()` has not been called since construction or the last reset
    NotStarted,
    /// Peers are being discovered or are still outstanding
    Connecting,
    /// Every discovered peer produced a terminal outcome and listeners ran
    Complete,
    /// The cycle was cancelled by `disconnect()`
    Aborted,
}

impl LoadState {
    /// Whether the cycle has reached a terminal state
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Connecting => write!(f, "connecting"),
            Self::Complete => write!(f, "complete"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Tally of one completed connect cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    /// Capability that was queried
    pub capability: Capability,
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Number of targets returned by discovery
    pub discovered: usize,
    /// Peers that answered with a payload
    pub resolved: usize,
    /// Peers that failed
    pub failed: usize,
    /// Ids of the failed peers, in arrival order
    pub failed_ids: Vec<String>,
    /// Set when discovery itself failed and the cycle completed empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_error: Option<String>,
    /// When `connect()` started the cycle
    pub started_at: DateTime<Utc>,
    /// When the last outcome arrived
    pub finished_at: DateTime<Utc>,
}

impl LoadReport {
    pub(crate) fn new(capability: Capability, cycle: u64) -> Self {
        let now = Utc::now();
        Self {
            capability,
            cycle,
            discovered: 0,
            resolved: 0,
            failed: 0,
            failed_ids: Vec::new(),
            discovery_error: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn record(&mut self, target: &PeerTarget, outcome: &PeerOutcome) {
        if outcome.is_payload() {
            self.resolved += 1;
        } else {
            self.failed += 1;
            self.failed_ids.push(target.id.clone());
        }
    }

    /// Number of peers that produced any terminal outcome
    #[must_use]
    pub const fn settled(&self) -> usize {
        self.resolved + self.failed
    }
}
