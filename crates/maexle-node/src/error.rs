//! Error types for the node.

use std::time::Duration;

use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a node.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The outbound ring link could not be (re)established.
    #[error("ring link down: {0}")]
    LinkDown(String),

    /// Every other peer went silent for longer than the grace period;
    /// the local uplink is the suspect. The only intentionally fatal
    /// condition.
    #[error("isolated from all peers for {0:?}")]
    Isolated(Duration),

    /// The event queue closed underneath a worker.
    #[error("event channel closed")]
    ChannelClosed,
}
