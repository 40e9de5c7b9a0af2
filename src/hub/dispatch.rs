//! Inbound message dispatcher
//!
//! Classifies each cloud-originated message as either a reply to an
//! outstanding synchronous request (routed into the correlation table) or a
//! fresh message (fanned out to the local module group the group map names).

use std::sync::Arc;

use thiserror::Error;

use super::keeper::{OfferError, SyncKeeper};
use crate::bus::ModuleBus;
use crate::config::GroupMap;
use crate::message::Message;

/// Dispatch failures; the inbound pump logs these and drops the message
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The message's group has no entry in the group map
    #[error("no local group mapped for message group {0:?}")]
    UnknownGroup(String),

    /// The reply's keeper was gone or its slot full
    #[error(transparent)]
    Reply(#[from] OfferError),
}

/// Routes inbound messages to the correlation table or the local bus
pub struct Dispatcher {
    keeper: Arc<SyncKeeper>,
    groups: GroupMap,
    bus: Arc<dyn ModuleBus>,
}

impl Dispatcher {
    /// Create a dispatcher over the shared correlation table and bus
    pub fn new(keeper: Arc<SyncKeeper>, groups: GroupMap, bus: Arc<dyn ModuleBus>) -> Self {
        Self {
            keeper,
            groups,
            bus,
        }
    }

    /// Route one inbound message.
    ///
    /// A non-empty `parent_id` marks a reply; it is offered to the
    /// correlation slot without blocking, and if the keeper already timed
    /// out and reclaimed the slot the reply is dropped rather than routed
    /// onward. Originals (empty `parent_id`) are translated through the
    /// group map and published to the target module group.
    pub async fn dispatch(&self, msg: Message) -> Result<(), DispatchError> {
        if !msg.parent_id.is_empty() {
            let parent_id = msg.parent_id.clone();
            return self
                .keeper
                .offer(&parent_id, msg)
                .await
                .map_err(DispatchError::from);
        }

        match self.groups.target(&msg.group) {
            Some(target) => {
                self.bus.send_to_group(target, msg).await;
                Ok(())
            }
            None => Err(DispatchError::UnknownGroup(msg.group)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelBus;
    use crate::config::target;
    use crate::message::group;

    fn dispatcher(bus: Arc<ChannelBus>) -> (Arc<SyncKeeper>, Dispatcher) {
        let keeper = Arc::new(SyncKeeper::new());
        let d = Dispatcher::new(keeper.clone(), GroupMap::default(), bus);
        (keeper, d)
    }

    /// Story: a fresh twin update lands in the twin module group
    #[tokio::test]
    async fn story_fresh_message_routes_by_group_map() {
        let bus = Arc::new(ChannelBus::new());
        bus.register("twinmod", target::TWIN).await;
        let (_keeper, dispatcher) = dispatcher(bus.clone());

        let msg = Message::new()
            .route("cloudhub", group::TWIN)
            .resource_operation("device-7", "update");
        dispatcher.dispatch(msg.clone()).await.expect("dispatch");

        let got = bus.receive("twinmod").await.expect("delivery");
        assert_eq!(got.id, msg.id);
    }

    /// Story: an unmapped group is refused and nothing is published
    /// (scenario S3)
    #[tokio::test]
    async fn story_unknown_group_is_dropped() {
        let bus = Arc::new(ChannelBus::new());
        bus.register("twinmod", target::TWIN).await;
        let (_keeper, dispatcher) = dispatcher(bus.clone());

        let msg = Message::new().route("cloudhub", "unknown");
        let err = dispatcher.dispatch(msg).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownGroup(_)));

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            bus.receive("twinmod"),
        )
        .await;
        assert!(pending.is_err(), "nothing may reach any local group");
    }

    /// Story: a reply to an outstanding request bypasses the group map
    /// entirely, even if its group would not route
    #[tokio::test]
    async fn story_reply_goes_to_the_keeper() {
        let bus = Arc::new(ChannelBus::new());
        let (keeper, dispatcher) = dispatcher(bus);

        let request = Message::new().sync();
        let mut slot = keeper.add(&request.id).await;

        let mut reply = Message::response_to(&request, "ok");
        reply.group = "unroutable".into();
        dispatcher.dispatch(reply.clone()).await.expect("dispatch");

        let got = slot.recv().await.expect("reply in slot");
        assert_eq!(got.id, reply.id);
    }

    /// Story: a reply whose keeper timed out is dropped, not misrouted to a
    /// module group (sync timeout reclaim)
    #[tokio::test]
    async fn story_late_reply_is_dropped() {
        let bus = Arc::new(ChannelBus::new());
        bus.register("metamod", target::META).await;
        let (keeper, dispatcher) = dispatcher(bus.clone());

        let request = Message::new().route("metamanager", group::RESOURCE).sync();
        let _slot = keeper.add(&request.id).await;
        keeper.remove(&request.id).await; // keeper gave up

        let reply = Message::response_to(&request, "too late");
        let err = dispatcher.dispatch(reply).await.unwrap_err();
        assert!(matches!(err, DispatchError::Reply(OfferError::NoSlot(_))));

        // The reply's group would map to meta, but it must not arrive there.
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            bus.receive("metamod"),
        )
        .await;
        assert!(pending.is_err());
    }
}
