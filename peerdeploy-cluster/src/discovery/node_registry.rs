//! Node registry for cluster member discovery
//!
//! Tracks live nodes in process and publishes join/leave/failure
//! notifications to subscribers.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use peerdeploy_core::config::MembershipConfig;
use peerdeploy_core::MemberId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use super::membership::{Membership, MembershipEvent};

/// Capacity of the membership event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Node information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: MemberId,
    pub address: String,
    pub last_heartbeat: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
    /// Fencing token (epoch) for split-brain protection
    /// Increments on each registration to prevent stale updates
    #[serde(default)]
    pub epoch: u64,
}

impl NodeInfo {
    #[must_use]
    pub fn new(node_id: MemberId, address: String) -> Self {
        Self {
            node_id,
            address,
            last_heartbeat: Utc::now(),
            metadata: HashMap::new(),
            epoch: 1,
        }
    }

    #[must_use]
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    /// Check if node is stale (no recent heartbeat)
    #[must_use]
    pub fn is_stale(&self, timeout_secs: i64) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_heartbeat);
        elapsed.num_seconds() > timeout_secs
    }

    #[must_use]
    pub fn fencing_token(&self) -> FencingToken {
        FencingToken::new(self.node_id.clone(), self.epoch)
    }
}

/// Fencing token for split-brain protection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FencingToken {
    pub node_id: MemberId,
    pub epoch: u64,
}

impl FencingToken {
    #[must_use]
    pub const fn new(node_id: MemberId, epoch: u64) -> Self {
        Self { node_id, epoch }
    }

    /// Check if this token is newer than another (same node, higher epoch)
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.node_id == other.node_id && self.epoch > other.epoch
    }
}

/// In-process node registry
///
/// Remote nodes are added as the transport learns about them. A node that
/// re-registers with an older epoch than the one on record is ignored.
pub struct NodeRegistry {
    node_id: MemberId,
    pub heartbeat_timeout_secs: i64,
    nodes: RwLock<HashMap<MemberId, NodeInfo>>,
    events_tx: broadcast::Sender<MembershipEvent>,
    current_epoch: AtomicU64,
}

impl NodeRegistry {
    #[must_use]
    pub fn new(node_id: MemberId, heartbeat_timeout_secs: i64) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            node_id,
            heartbeat_timeout_secs,
            nodes: RwLock::new(HashMap::new()),
            events_tx,
            current_epoch: AtomicU64::new(1),
        }
    }

    /// Registry for the configured node ID, or a generated one when unset
    #[must_use]
    pub fn from_config(config: &MembershipConfig) -> Self {
        let node_id = if config.node_id.is_empty() {
            MemberId::new()
        } else {
            MemberId::from(config.node_id.as_str())
        };
        Self::new(node_id, config.heartbeat_timeout_secs)
    }

    #[must_use]
    pub const fn node_id(&self) -> &MemberId {
        &self.node_id
    }

    #[must_use]
    pub fn current_fencing_token(&self) -> FencingToken {
        FencingToken::new(self.node_id.clone(), self.current_epoch.load(Ordering::SeqCst))
    }

    /// Register this node, bumping its epoch
    pub fn register(&self, address: String) {
        let epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let node_info = NodeInfo::new(self.node_id.clone(), address).with_epoch(epoch);
        self.nodes.write().insert(self.node_id.clone(), node_info);

        tracing::debug!(node_id = %self.node_id, epoch, "Local node registered");
    }

    /// Register a remote node (called when another node joins)
    ///
    /// Returns false if a newer registration of the same node is already known.
    pub fn register_remote(&self, node_info: NodeInfo) -> bool {
        let node_id = node_info.node_id.clone();
        let joined = {
            let mut nodes = self.nodes.write();
            if let Some(existing) = nodes.get(&node_id) {
                if existing.fencing_token().is_newer_than(&node_info.fencing_token()) {
                    tracing::warn!(
                        node_id = %node_id,
                        known_epoch = existing.epoch,
                        received_epoch = node_info.epoch,
                        "Ignoring stale node registration"
                    );
                    return false;
                }
            }
            nodes.insert(node_id.clone(), node_info).is_none()
        };

        if joined {
            tracing::info!(node_id = %node_id, "Node joined cluster");
            self.publish(MembershipEvent::Joined(node_id));
        }
        true
    }

    /// Update heartbeat for a remote node
    pub fn heartbeat_remote(&self, node_id: &MemberId) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(node_id) {
            Some(node) => {
                node.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove a node that left gracefully
    pub fn unregister_remote(&self, node_id: &MemberId) -> Option<NodeInfo> {
        let removed = self.nodes.write().remove(node_id);
        if removed.is_some() {
            tracing::info!(node_id = %node_id, "Node left cluster");
            self.publish(MembershipEvent::Left(node_id.clone()));
        }
        removed
    }

    /// Remove a node that was declared dead
    pub fn mark_failed(&self, node_id: &MemberId) -> Option<NodeInfo> {
        let removed = self.nodes.write().remove(node_id);
        if removed.is_some() {
            tracing::warn!(node_id = %node_id, "Node failed");
            self.publish(MembershipEvent::Failed(node_id.clone()));
        }
        removed
    }

    /// Fail every remote node whose heartbeat expired
    ///
    /// The local node is never evicted. Returns the evicted node IDs.
    pub fn evict_stale(&self) -> Vec<MemberId> {
        let stale: Vec<NodeInfo> = {
            let mut nodes = self.nodes.write();
            let ids: Vec<MemberId> = nodes
                .values()
                .filter(|n| n.node_id != self.node_id && n.is_stale(self.heartbeat_timeout_secs))
                .map(|n| n.node_id.clone())
                .collect();
            ids.iter().filter_map(|id| nodes.remove(id)).collect()
        };

        for node in &stale {
            tracing::warn!(
                node_id = %node.node_id,
                last_heartbeat = ?node.last_heartbeat,
                "Node marked failed: heartbeat expired"
            );
            self.publish(MembershipEvent::Failed(node.node_id.clone()));
        }

        stale.into_iter().map(|n| n.node_id).collect()
    }

    #[must_use]
    pub fn get_node(&self, node_id: &MemberId) -> Option<NodeInfo> {
        self.nodes.read().get(node_id).cloned()
    }

    fn publish(&self, event: MembershipEvent) {
        // No subscribers is not an error
        let _ = self.events_tx.send(event);
    }
}

impl Membership for NodeRegistry {
    fn is_live(&self, member_id: &MemberId) -> bool {
        self.nodes.read().contains_key(member_id)
    }

    fn live_members(&self) -> Vec<MemberId> {
        self.nodes.read().keys().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events_tx.subscribe()
    }
}
