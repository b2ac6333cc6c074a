use chrono::{DateTime, Utc};
use peerdeploy_core::{DeploymentId, MemberId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::record::DeploymentRecord;
use crate::error::Result;

/// Observability sink for deployment changes
///
/// Called outside the registry lock; implementations may re-enter the registry.
pub trait DeploymentEventSink: Send + Sync {
    /// A module alias was materialized on `record` for the first time
    fn record_deployed(&self, record: &DeploymentRecord, alias: &str, is_task: bool);

    /// `record` was removed; `departed` names the member whose departure caused it
    fn record_undeployed(&self, record: &DeploymentRecord, departed: Option<&MemberId>);
}

/// Downstream cleanup run for every undeployed record
pub trait UndeployHook: Send + Sync {
    fn on_undeployed(&self, record: &DeploymentRecord, departed: Option<&MemberId>) -> Result<()>;
}

/// Deployment events published to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentEvent {
    ClassDeployed {
        deployment_id: DeploymentId,
        sender_id: MemberId,
        alias: String,
        timestamp: DateTime<Utc>,
    },

    TaskDeployed {
        deployment_id: DeploymentId,
        sender_id: MemberId,
        alias: String,
        timestamp: DateTime<Utc>,
    },

    ClassUndeployed {
        deployment_id: DeploymentId,
        sender_id: MemberId,
        alias: String,
        departed_node_id: Option<MemberId>,
        deployed_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    TaskUndeployed {
        deployment_id: DeploymentId,
        sender_id: MemberId,
        alias: String,
        departed_node_id: Option<MemberId>,
        deployed_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
}

impl DeploymentEvent {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ClassDeployed { .. } => "class_deployed",
            Self::TaskDeployed { .. } => "task_deployed",
            Self::ClassUndeployed { .. } => "class_undeployed",
            Self::TaskUndeployed { .. } => "task_undeployed",
        }
    }

    #[must_use]
    pub const fn deployment_id(&self) -> &DeploymentId {
        match self {
            Self::ClassDeployed { deployment_id, .. }
            | Self::TaskDeployed { deployment_id, .. }
            | Self::ClassUndeployed { deployment_id, .. }
            | Self::TaskUndeployed { deployment_id, .. } => deployment_id,
        }
    }

    #[must_use]
    pub fn alias(&self) -> &str {
        match self {
            Self::ClassDeployed { alias, .. }
            | Self::TaskDeployed { alias, .. }
            | Self::ClassUndeployed { alias, .. }
            | Self::TaskUndeployed { alias, .. } => alias,
        }
    }

    /// Member whose departure triggered an undeploy event
    #[must_use]
    pub const fn departed_node_id(&self) -> Option<&MemberId> {
        match self {
            Self::ClassUndeployed { departed_node_id, .. }
            | Self::TaskUndeployed { departed_node_id, .. } => departed_node_id.as_ref(),
            Self::ClassDeployed { .. } | Self::TaskDeployed { .. } => None,
        }
    }

    fn deployed(record: &DeploymentRecord, alias: &str, is_task: bool) -> Self {
        let deployment_id = record.id().clone();
        let sender_id = record.sender_id().clone();
        let alias = alias.to_string();
        let timestamp = Utc::now();

        if is_task {
            Self::TaskDeployed { deployment_id, sender_id, alias, timestamp }
        } else {
            Self::ClassDeployed { deployment_id, sender_id, alias, timestamp }
        }
    }

    /// One event per materialized alias of the record
    fn undeployed(record: &DeploymentRecord, departed: Option<&MemberId>) -> Vec<Self> {
        let deployed_at = record.deployed_at();
        let timestamp = Utc::now();

        record
            .resolved_modules()
            .into_iter()
            .map(|(alias, module)| {
                let deployment_id = record.id().clone();
                let sender_id = record.sender_id().clone();
                let departed_node_id = departed.cloned();

                if module.is_task() {
                    Self::TaskUndeployed { deployment_id, sender_id, alias, departed_node_id, deployed_at, timestamp }
                } else {
                    Self::ClassUndeployed { deployment_id, sender_id, alias, departed_node_id, deployed_at, timestamp }
                }
            })
            .collect()
    }
}

/// Sink that only writes log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl DeploymentEventSink for TracingEventSink {
    fn record_deployed(&self, record: &DeploymentRecord, alias: &str, is_task: bool) {
        tracing::info!(
            deployment_id = %record.id(),
            sender_id = %record.sender_id(),
            alias,
            kind = if is_task { "task" } else { "class" },
            mode = %record.mode(),
            "Module deployed"
        );
    }

    fn record_undeployed(&self, record: &DeploymentRecord, departed: Option<&MemberId>) {
        for (alias, module) in record.resolved_modules() {
            tracing::info!(
                deployment_id = %record.id(),
                sender_id = %record.sender_id(),
                alias = %alias,
                module = module.name(),
                kind = if module.is_task() { "task" } else { "class" },
                departed_node_id = ?departed,
                deployed_at = %record.deployed_at(),
                "Module undeployed"
            );
        }
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl DeploymentEventSink for NoopEventSink {
    fn record_deployed(&self, _record: &DeploymentRecord, _alias: &str, _is_task: bool) {}

    fn record_undeployed(&self, _record: &DeploymentRecord, _departed: Option<&MemberId>) {}
}

/// Sink that publishes [`DeploymentEvent`]s on a broadcast channel
#[derive(Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<DeploymentEvent>,
}

impl BroadcastEventSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: DeploymentEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(event_type = e.0.event_type(), "No deployment event subscribers");
        }
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl DeploymentEventSink for BroadcastEventSink {
    fn record_deployed(&self, record: &DeploymentRecord, alias: &str, is_task: bool) {
        self.publish(DeploymentEvent::deployed(record, alias, is_task));
    }

    fn record_undeployed(&self, record: &DeploymentRecord, departed: Option<&MemberId>) {
        for event in DeploymentEvent::undeployed(record, departed) {
            self.publish(event);
        }
    }
}
