//! Error types for the plugin loader

use thiserror::Error;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving a loader
///
/// Failures of individual plugins are not errors; they are reported as
/// [`crate::PeerFailure`] values and handed to the loader's handler.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Capability name is not usable
    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    /// Capability registry could not be queried
    #[error("discovery error: {0}")]
    Discovery(String),

    /// No async runtime available to drive peer connections
    #[error("runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
