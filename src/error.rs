//! Error types for the Tether agent

use thiserror::Error;

/// Main error type for Tether operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Fatal configuration error (unknown transport kind, incomplete identity)
    #[error("configuration error: {0}")]
    Config(String),

    /// Cloud transport error
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// Local message bus error
    #[error("bus error: {0}")]
    Bus(#[from] crate::bus::BusError),

    /// Placement lookup error
    #[error("placement error: {0}")]
    Placement(#[from] crate::placement::PlacementError),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
