//! Immutable agent configuration
//!
//! [`HubConfig`] is assembled once by the composition root (CLI flags and
//! environment variables) and never mutated afterwards. The session
//! controller only ever reads it.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::message::group;
use crate::transport::TransportKind;
use crate::Error;

/// Local module group names the hub routes cloud messages into
pub mod target {
    /// Metadata manager group (resource and function messages)
    pub const META: &str = "meta";
    /// Device twin group
    pub const TWIN: &str = "twin";
    /// Application sync group
    pub const SYNC: &str = "sync";
    /// Event/user bus group
    pub const BUS: &str = "bus";
}

/// Translation from a cloud message's `group` field to a local module group.
///
/// Lifted into configuration so deployments can extend routing; the factory
/// default covers the standard module set. Messages whose group has no entry
/// are dropped with a warning.
#[derive(Clone, Debug)]
pub struct GroupMap {
    entries: HashMap<String, String>,
}

impl Default for GroupMap {
    fn default() -> Self {
        let entries = [
            (group::RESOURCE, target::META),
            (group::TWIN, target::TWIN),
            (group::APP, target::SYNC),
            (group::FUNC, target::META),
            (group::USER, target::BUS),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self { entries }
    }
}

impl GroupMap {
    /// Build a map from explicit entries (deployment override)
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Local module group for a cloud message group, if mapped
    pub fn target(&self, message_group: &str) -> Option<&str> {
        self.entries.get(message_group).map(String::as_str)
    }

    /// Distinct local target groups, in stable order.
    ///
    /// Connection-state events are published once per target group, so
    /// duplicates (e.g. `resource` and `func` both mapping to `meta`) must
    /// collapse here.
    pub fn targets(&self) -> Vec<&str> {
        self.entries
            .values()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Agent configuration, immutable after startup
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Project identifier half of the node identity tuple
    pub project_id: String,
    /// Node identifier half of the node identity tuple
    pub node_id: String,
    /// HTTPS placement endpoint returning the cloud hub base URL
    pub placement_url: String,
    /// Direct cloud hub URL, used only in test mode
    pub ws_url: String,
    /// Client certificate path for mutual TLS
    pub cert_file: PathBuf,
    /// Client private key path for mutual TLS
    pub key_file: PathBuf,
    /// Keepalive interval; also the sync-reply deadline and cooldown basis
    pub heartbeat_period: Duration,
    /// WebSocket handshake timeout
    pub handshake_timeout: Duration,
    /// Transport write deadline
    pub write_deadline: Duration,
    /// Skip placement lookup and connect to `ws_url` directly
    pub test_mode: bool,
    /// Transport selector
    pub transport: TransportKind,
    /// Cloud group to local module group translation
    pub group_map: GroupMap,
}

impl HubConfig {
    /// Check invariants that would otherwise surface as confusing runtime
    /// failures: a complete identity tuple (unless test mode is explicit)
    /// and a nonzero heartbeat.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.test_mode && (self.project_id.is_empty() || self.node_id.is_empty()) {
            return Err(Error::config(
                "project_id and node_id are required unless --test-mode is set",
            ));
        }
        if !self.test_mode && self.placement_url.is_empty() {
            return Err(Error::config(
                "placement_url is required unless --test-mode is set",
            ));
        }
        if self.test_mode && self.ws_url.is_empty() {
            return Err(Error::config("ws_url is required in test mode"));
        }
        if self.heartbeat_period.is_zero() {
            return Err(Error::config("heartbeat_period must be nonzero"));
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            node_id: String::new(),
            placement_url: String::new(),
            ws_url: String::new(),
            cert_file: PathBuf::new(),
            key_file: PathBuf::new(),
            heartbeat_period: Duration::from_secs(crate::DEFAULT_HEARTBEAT_SECS),
            handshake_timeout: Duration::from_secs(crate::DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            write_deadline: Duration::from_secs(crate::DEFAULT_WRITE_DEADLINE_SECS),
            test_mode: false,
            transport: TransportKind::WebSocket,
            group_map: GroupMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HubConfig {
        HubConfig {
            project_id: "p1".into(),
            node_id: "n1".into(),
            placement_url: "https://placement.example.com/v1/placement".into(),
            ..Default::default()
        }
    }

    /// Story: the default table routes every standard cloud group
    #[test]
    fn story_default_group_map_covers_standard_groups() {
        let map = GroupMap::default();
        assert_eq!(map.target(group::RESOURCE), Some(target::META));
        assert_eq!(map.target(group::TWIN), Some(target::TWIN));
        assert_eq!(map.target(group::APP), Some(target::SYNC));
        assert_eq!(map.target(group::FUNC), Some(target::META));
        assert_eq!(map.target(group::USER), Some(target::BUS));
        assert_eq!(map.target("unknown"), None);
    }

    /// Story: duplicate targets collapse for connection-state fan-out
    ///
    /// `resource` and `func` both land in `meta`; a connect event must still
    /// reach `meta` exactly once.
    #[test]
    fn story_targets_are_distinct_and_stable() {
        let map = GroupMap::default();
        assert_eq!(map.targets(), vec!["bus", "meta", "sync", "twin"]);
    }

    /// Story: production deployments must carry a complete identity
    #[test]
    fn story_incomplete_identity_is_rejected() {
        let cfg = HubConfig {
            node_id: String::new(),
            ..test_config()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("project_id and node_id"));
    }

    /// Story: test mode makes the direct URL mandatory instead
    #[test]
    fn story_test_mode_bypasses_identity_but_needs_url() {
        let cfg = HubConfig {
            test_mode: true,
            ws_url: "ws://localhost:10000/e632aba927ea4ac2b575ec1603d56f10/events".into(),
            project_id: String::new(),
            node_id: String::new(),
            placement_url: String::new(),
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());

        let cfg = HubConfig {
            test_mode: true,
            ws_url: String::new(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    /// Story: a zero heartbeat would disable keepalives and sync deadlines
    #[test]
    fn story_zero_heartbeat_is_rejected() {
        let cfg = HubConfig {
            heartbeat_period: Duration::ZERO,
            ..test_config()
        };
        assert!(cfg.validate().is_err());
    }
}
