//! In-process message bus
//!
//! Local functional modules (meta manager, device twin, app sync, event bus)
//! and the hub controller exchange [`Message`]s through a named-module
//! pub/sub bus. Modules register under a unique name and a group; messages
//! can target one module, fan out to a group, or travel as a synchronous
//! request that blocks the caller until the correlated reply arrives.
//!
//! The hub controller consumes only [`ModuleBus`]; [`ChannelBus`] is the
//! channel-backed implementation used by the composition root and tests.
//!
//! Registration is explicit: the composition root calls
//! [`ChannelBus::register`] for every module before starting it. There is no
//! process-wide registry singleton.

mod channel;

pub use channel::ChannelBus;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::Message;

/// Message bus errors
#[derive(Debug, Error)]
pub enum BusError {
    /// Target module is not registered
    #[error("module not registered: {0}")]
    UnknownModule(String),

    /// The module's mailbox has been cleaned up
    #[error("bus channel closed")]
    Closed,

    /// A synchronous request saw no reply within its deadline
    #[error("timeout waiting for reply")]
    Timeout,
}

/// The bus surface consumed by modules.
///
/// `send_resp` delivers a reply to whichever `send_sync` caller issued the
/// request with `id == reply.parent_id`; replies without a waiting caller
/// are dropped with a warning.
#[async_trait]
pub trait ModuleBus: Send + Sync {
    /// Deliver a message to one named module
    async fn send(&self, module: &str, msg: Message) -> Result<(), BusError>;

    /// Fire-and-forget publish to every module in a group
    async fn send_to_group(&self, group: &str, msg: Message);

    /// Deliver a message and block until the correlated reply arrives or
    /// the deadline elapses
    async fn send_sync(
        &self,
        module: &str,
        msg: Message,
        deadline: Duration,
    ) -> Result<Message, BusError>;

    /// Deliver a correlated reply back to the originating `send_sync` caller
    async fn send_resp(&self, msg: Message);

    /// Blocking read of the next message addressed to `module`
    async fn receive(&self, module: &str) -> Result<Message, BusError>;

    /// Release the module's subscription; a blocked `receive` observes
    /// [`BusError::Closed`]
    async fn cleanup(&self, module: &str);
}
