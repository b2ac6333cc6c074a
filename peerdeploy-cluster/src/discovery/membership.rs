use peerdeploy_core::MemberId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Membership change observed by the discovery layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "node_id", rename_all = "snake_case")]
pub enum MembershipEvent {
    Joined(MemberId),
    /// Member left gracefully
    Left(MemberId),
    /// Member stopped heartbeating or was declared dead
    Failed(MemberId),
}

impl MembershipEvent {
    #[must_use]
    pub const fn member_id(&self) -> &MemberId {
        match self {
            Self::Joined(id) | Self::Left(id) | Self::Failed(id) => id,
        }
    }

    /// True for events after which the member's deployments are obsolete
    #[must_use]
    pub const fn is_departure(&self) -> bool {
        matches!(self, Self::Left(_) | Self::Failed(_))
    }

    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Joined(_) => "joined",
            Self::Left(_) => "left",
            Self::Failed(_) => "failed",
        }
    }
}

/// View of the live cluster topology
pub trait Membership: Send + Sync {
    /// Whether the member is currently part of the cluster
    fn is_live(&self, member_id: &MemberId) -> bool;

    /// Snapshot of all live members
    fn live_members(&self) -> Vec<MemberId>;

    /// Subscribe to membership changes
    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent>;
}
