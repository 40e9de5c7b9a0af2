//! Hub controller module
//!
//! The reconnect-aware core of the agent: a session supervisor
//! ([`HubController`]), the inbound [`Dispatcher`], and the [`SyncKeeper`]
//! correlation table for synchronous request/response tracking.
//!
//! # Session lifecycle
//!
//! ```text
//! Resolving -> Connecting -> Connected -> Draining -> Cooldown -> Resolving ...
//! ```
//!
//! Entry to `Connected` publishes `cloud-connected` to every local target
//! group; entry to `Draining` publishes `cloud-disconnected`. There is no
//! terminal state; the controller reconnects until the process exits.

pub mod controller;
pub mod dispatch;
pub mod keeper;

pub use controller::{HubController, SessionPhase};
pub use dispatch::{DispatchError, Dispatcher};
pub use keeper::{OfferError, SyncKeeper};
