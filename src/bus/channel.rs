//! Channel-backed bus implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, warn};

use super::{BusError, ModuleBus};
use crate::message::Message;

/// Mailbox depth per module
const MAILBOX_CAPACITY: usize = 1024;

struct Mailbox {
    group: String,
    tx: mpsc::Sender<Message>,
    // Shared so receive() works through &self; one consumer per module.
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
}

/// In-memory bus backed by one mpsc mailbox per module.
///
/// Group sends fan out to every member's mailbox. Synchronous requests park
/// a one-shot reply slot under the request id; `send_resp` completes it.
#[derive(Default)]
pub struct ChannelBus {
    modules: RwLock<HashMap<String, Mailbox>>,
    replies: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

impl ChannelBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `name` in `group`.
    ///
    /// Called from the composition root before the module starts. A second
    /// registration under the same name replaces the first and closes its
    /// mailbox.
    pub async fn register(&self, name: &str, group: &str) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let mailbox = Mailbox {
            group: group.to_string(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        };
        let mut modules = self.modules.write().await;
        if modules.insert(name.to_string(), mailbox).is_some() {
            warn!(module = name, "module re-registered, replacing mailbox");
        } else {
            debug!(module = name, group, "module registered");
        }
    }

    async fn sender_for(&self, module: &str) -> Result<mpsc::Sender<Message>, BusError> {
        let modules = self.modules.read().await;
        modules
            .get(module)
            .map(|m| m.tx.clone())
            .ok_or_else(|| BusError::UnknownModule(module.to_string()))
    }
}

#[async_trait]
impl ModuleBus for ChannelBus {
    async fn send(&self, module: &str, msg: Message) -> Result<(), BusError> {
        let tx = self.sender_for(module).await?;
        tx.send(msg).await.map_err(|_| BusError::Closed)
    }

    async fn send_to_group(&self, group: &str, msg: Message) {
        let members: Vec<(String, mpsc::Sender<Message>)> = {
            let modules = self.modules.read().await;
            modules
                .iter()
                .filter(|(_, m)| m.group == group)
                .map(|(name, m)| (name.clone(), m.tx.clone()))
                .collect()
        };
        if members.is_empty() {
            debug!(group, "no modules in group, dropping message");
            return;
        }
        for (name, tx) in members {
            if tx.send(msg.clone()).await.is_err() {
                warn!(module = %name, group, "mailbox closed, dropping group message");
            }
        }
    }

    async fn send_sync(
        &self,
        module: &str,
        msg: Message,
        deadline: Duration,
    ) -> Result<Message, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = msg.id.clone();
        self.replies.lock().await.insert(id.clone(), reply_tx);

        if let Err(e) = self.send(module, msg).await {
            self.replies.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Sender dropped without replying (module cleaned up mid-request)
            Ok(Err(_)) => {
                self.replies.lock().await.remove(&id);
                Err(BusError::Closed)
            }
            Err(_) => {
                self.replies.lock().await.remove(&id);
                Err(BusError::Timeout)
            }
        }
    }

    async fn send_resp(&self, msg: Message) {
        let slot = self.replies.lock().await.remove(&msg.parent_id);
        match slot {
            Some(tx) => {
                if tx.send(msg).is_err() {
                    debug!("sync caller gave up before the reply arrived");
                }
            }
            None => warn!(parent_id = %msg.parent_id, "no caller waiting for reply, dropping"),
        }
    }

    async fn receive(&self, module: &str) -> Result<Message, BusError> {
        let rx = {
            let modules = self.modules.read().await;
            modules
                .get(module)
                .map(|m| Arc::clone(&m.rx))
                .ok_or_else(|| BusError::UnknownModule(module.to_string()))?
        };
        let mut rx = rx.lock().await;
        rx.recv().await.ok_or(BusError::Closed)
    }

    async fn cleanup(&self, module: &str) {
        if self.modules.write().await.remove(module).is_some() {
            debug!(module, "module unregistered");
        }
    }
}
