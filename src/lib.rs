//! Tether - edge-side connectivity agent for the cloud hub control plane
//!
//! Tether runs on every edge node and owns the node's single persistent
//! session to the cloud hub. Control-plane messages (resource updates, device
//! twins, application events, user messages, keepalives) are multiplexed
//! between the cloud transport and an in-process message bus that fans
//! messages out to the local functional modules on the node.
//!
//! # Architecture
//!
//! The connection is **outbound** from the edge node to the cloud hub. The
//! hub controller is the only long-lived orchestrator: per session it
//! resolves the hub URL, initializes the transport, runs three pumps
//! (inbound, outbound, heartbeat), and supervises teardown and reconnect
//! when any pump reports a transport failure.
//!
//! # Modules
//!
//! - [`hub`] - Session controller, dispatcher, and sync-reply correlation
//! - [`bus`] - In-process message bus (named modules, module groups)
//! - [`transport`] - Cloud transport abstraction and WebSocket binding
//! - [`placement`] - Placement-service lookup of the cloud hub URL
//! - [`message`] - Control-plane message model
//! - [`config`] - Immutable agent configuration
//! - [`error`] - Error types for the agent

#![deny(missing_docs)]

pub mod bus;
pub mod config;
pub mod error;
pub mod hub;
pub mod message;
pub mod placement;
pub mod transport;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// These constants define the default values used throughout Tether.
// Centralizing them here ensures consistency across CLI defaults and
// test fixtures.

/// Module name the hub controller registers under on the local bus.
///
/// Outbound messages addressed to this module are forwarded to the cloud;
/// this is also the `source` field of keepalive messages on the wire.
pub const MODULE_NAME: &str = "edgehub";

/// Local bus group the hub controller itself belongs to
pub const MODULE_GROUP: &str = "hub";

/// Default keepalive interval in seconds; the same period is the sync-reply
/// deadline, and the post-disconnect cooldown is twice it
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;

/// Default WebSocket handshake timeout in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Default transport write deadline in seconds
pub const DEFAULT_WRITE_DEADLINE_SECS: u64 = 15;
