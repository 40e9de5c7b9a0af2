//! Control-plane message model
//!
//! Every payload crossing the cloud transport or the local bus is a
//! [`Message`]. The routing tuple (`source`, `group`, `resource`,
//! `operation`) decides where a message goes; the header (`id`,
//! `parent_id`, `is_sync`) carries request/response correlation.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known `group` values on cloud-originated messages
pub mod group {
    /// Resource updates (pods, configmaps, node state)
    pub const RESOURCE: &str = "resource";
    /// Device twin updates
    pub const TWIN: &str = "twin";
    /// Application events
    pub const APP: &str = "app";
    /// Function/runtime events
    pub const FUNC: &str = "func";
    /// User and bus messages
    pub const USER: &str = "user";
}

/// Routing constants for the synthetic connection-state events published to
/// every local module group on connect and disconnect
pub mod connection {
    /// `source` of connection-state events
    pub const SOURCE: &str = "node-connection-source";
    /// `resource` of connection-state events
    pub const RESOURCE: &str = "node-connection-resource";
    /// `operation` of connection-state events
    pub const OPERATION: &str = "node-connection-operation";
    /// Body published when the cloud session comes up
    pub const CLOUD_CONNECTED: &str = "cloud-connected";
    /// Body published when the cloud session goes down
    pub const CLOUD_DISCONNECTED: &str = "cloud-disconnected";
}

/// A control-plane message.
///
/// Replies carry the originating message's `id` in `parent_id`; originals
/// leave `parent_id` empty. `is_sync` marks an outbound message whose sender
/// awaits exactly one correlated reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier assigned at creation
    pub id: String,
    /// Empty for originals; the originating `id` on replies
    #[serde(default)]
    pub parent_id: String,
    /// Creation time in epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
    /// Originating module
    #[serde(default)]
    pub source: String,
    /// Routing group (see [`group`])
    #[serde(default)]
    pub group: String,
    /// Resource the operation applies to
    #[serde(default)]
    pub resource: String,
    /// Operation name
    #[serde(default)]
    pub operation: String,
    /// Opaque payload
    #[serde(default)]
    pub body: Value,
    /// True when the sender awaits a correlated reply
    #[serde(default)]
    pub is_sync: bool,
}

impl Message {
    /// Create a new message with a fresh id and empty routing
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: String::new(),
            timestamp: epoch_millis(),
            source: String::new(),
            group: String::new(),
            resource: String::new(),
            operation: String::new(),
            body: Value::Null,
            is_sync: false,
        }
    }

    /// Create a reply to `original`: fresh id, `parent_id` set to the
    /// original's id, routing tuple carried over
    pub fn response_to(original: &Message, body: impl Into<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: original.id.clone(),
            timestamp: epoch_millis(),
            source: original.source.clone(),
            group: original.group.clone(),
            resource: original.resource.clone(),
            operation: original.operation.clone(),
            body: body.into(),
            is_sync: false,
        }
    }

    /// Set the originating module and routing group
    pub fn route(mut self, source: &str, group: &str) -> Self {
        self.source = source.to_string();
        self.group = group.to_string();
        self
    }

    /// Set the resource and operation
    pub fn resource_operation(mut self, resource: &str, operation: &str) -> Self {
        self.resource = resource.to_string();
        self.operation = operation.to_string();
        self
    }

    /// Set the payload
    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = body.into();
        self
    }

    /// Mark this message as awaiting a correlated reply
    pub fn sync(mut self) -> Self {
        self.is_sync = true;
        self
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
