//! Sync-reply correlation table
//!
//! Every outbound synchronous message parks a capacity-one reply slot here
//! under its id. The inbound dispatcher offers replies into the slot without
//! blocking; the sync-keeper task that inserted the entry owns its removal,
//! on reply or on deadline, whichever comes first.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use crate::message::Message;

/// Reply-offer failures; both end with the reply dropped
#[derive(Debug, Error)]
pub enum OfferError {
    /// The keeper already timed out and removed its slot
    #[error("no reply slot for parent id {0}")]
    NoSlot(String),

    /// The slot already holds a reply
    #[error("reply slot for parent id {0} already occupied")]
    Occupied(String),
}

/// Correlation table for outstanding synchronous requests.
///
/// Lookups take the shared lock; insert and remove take the exclusive lock.
#[derive(Default)]
pub struct SyncKeeper {
    slots: RwLock<HashMap<String, mpsc::Sender<Message>>>,
}

impl SyncKeeper {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a slot under `id` and hand the receiving half to the caller,
    /// who becomes the entry's owner
    pub async fn add(&self, id: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(1);
        self.slots.write().await.insert(id.to_string(), tx);
        rx
    }

    /// Remove the entry under `id`; a second remove is a no-op
    pub async fn remove(&self, id: &str) {
        self.slots.write().await.remove(id);
    }

    /// Whether a slot exists under `id`
    pub async fn has(&self, id: &str) -> bool {
        self.slots.read().await.contains_key(id)
    }

    /// Non-blocking offer of a reply into the slot under `parent_id`.
    ///
    /// A keeper that already timed out leaves no slot; a duplicate reply
    /// finds the slot occupied. Either way the caller drops the message.
    pub async fn offer(&self, parent_id: &str, msg: Message) -> Result<(), OfferError> {
        let slots = self.slots.read().await;
        let slot = slots
            .get(parent_id)
            .ok_or_else(|| OfferError::NoSlot(parent_id.to_string()))?;
        slot.try_send(msg)
            .map_err(|_| OfferError::Occupied(parent_id.to_string()))
    }

    /// True when no requests are outstanding
    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: the reply finds its keeper through the slot
    #[tokio::test]
    async fn story_reply_reaches_the_keeper() {
        let keeper = SyncKeeper::new();
        let request = Message::new().sync();
        let mut slot = keeper.add(&request.id).await;

        assert!(keeper.has(&request.id).await);

        let reply = Message::response_to(&request, "ok");
        keeper.offer(&request.id, reply.clone()).await.expect("offer");

        let got = slot.recv().await.expect("reply");
        assert_eq!(got.id, reply.id);

        keeper.remove(&request.id).await;
        assert!(keeper.is_empty().await);
    }

    /// Story: a late reply finds no slot and is dropped (scenario S4 of the
    /// correlation lifecycle: keeper timed out first)
    #[tokio::test]
    async fn story_late_reply_finds_no_slot() {
        let keeper = SyncKeeper::new();
        let reply = Message::new();

        let err = keeper.offer("vanished-request", reply).await.unwrap_err();
        assert!(matches!(err, OfferError::NoSlot(_)));
    }

    /// Story: the slot holds exactly one reply; duplicates bounce
    #[tokio::test]
    async fn story_duplicate_reply_bounces() {
        let keeper = SyncKeeper::new();
        let _slot = keeper.add("req-1").await;

        keeper.offer("req-1", Message::new()).await.expect("first");
        let err = keeper.offer("req-1", Message::new()).await.unwrap_err();
        assert!(matches!(err, OfferError::Occupied(_)));
    }

    /// Story: remove is idempotent, so reply-path and timeout-path cleanup
    /// can race without harm
    #[tokio::test]
    async fn story_remove_is_idempotent() {
        let keeper = SyncKeeper::new();
        let _slot = keeper.add("req-1").await;

        keeper.remove("req-1").await;
        keeper.remove("req-1").await;
        assert!(keeper.is_empty().await);
    }
}
