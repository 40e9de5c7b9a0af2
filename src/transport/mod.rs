//! Cloud transport abstraction
//!
//! The session controller speaks to the cloud hub through a
//! [`TransportAdapter`]: an abstract bidirectional message channel with
//! explicit session lifecycle. The reference binding is WebSocket
//! ([`WebSocketTransport`]); the adapter seam exists so deployments can swap
//! in other durable transports without touching the controller.
//!
//! # Send serialization
//!
//! `send` is invoked concurrently by the outbound pump and the heartbeat
//! pump. Every adapter implementation MUST serialize writes internally so
//! concurrent sends never interleave on the wire; [`WebSocketTransport`]
//! does this with a mutex around the sink half.

mod websocket;

pub use websocket::WebSocketTransport;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::HubConfig;
use crate::message::Message;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Session establishment failed
    #[error("connect failed: {0}")]
    Connect(String),

    /// Operation attempted before `init` or after `uninit`
    #[error("transport not connected")]
    NotConnected,

    /// Session closed by the peer
    #[error("session closed")]
    Closed,

    /// Read or write I/O failure
    #[error("i/o error: {0}")]
    Io(String),

    /// A write did not complete within the configured deadline
    #[error("write deadline exceeded")]
    WriteDeadline,

    /// Inbound frame could not be decoded as a message
    #[error("bad frame: {0}")]
    Frame(String),
}

/// Abstract bidirectional message channel to the cloud hub
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Establish the session
    async fn init(&self) -> Result<(), TransportError>;

    /// Release the session; idempotent
    async fn uninit(&self);

    /// Deliver one message; safe under concurrent invocation
    async fn send(&self, msg: Message) -> Result<(), TransportError>;

    /// Blocking read of the next inbound message
    async fn receive(&self) -> Result<Message, TransportError>;
}

/// Supported transport kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// WebSocket over TLS (reference binding)
    WebSocket,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "websocket" => Ok(Self::WebSocket),
            other => Err(format!("unknown transport kind: {other}")),
        }
    }
}

/// Builds a transport for each session attempt.
///
/// Returning `None` means the configured kind has no binding, which the
/// controller treats as a fatal configuration error.
pub trait TransportFactory: Send + Sync {
    /// Build an adapter for a session against `url`
    fn build(&self, url: &str, config: &HubConfig) -> Option<Arc<dyn TransportAdapter>>;
}

/// Factory for the built-in transport bindings
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn build(&self, url: &str, config: &HubConfig) -> Option<Arc<dyn TransportAdapter>> {
        match config.transport {
            TransportKind::WebSocket => Some(Arc::new(WebSocketTransport::new(url, config))),
        }
    }
}
