//! Per-sender deployment registry
//!
//! Tracks code units shipped by remote members, resolves competing
//! versions by sender sequence number and evicts deployments when their
//! sender leaves, a newer version supersedes them, or they are undeployed.

pub mod context;
pub mod events;
pub mod metadata;
pub mod record;
pub mod registry;
pub mod scheduler;

pub use context::{ContextLoader, Module, ResolutionContext};
pub use events::{
    BroadcastEventSink, DeploymentEvent, DeploymentEventSink, NoopEventSink, TracingEventSink,
    UndeployHook,
};
pub use metadata::{DeploymentMetadata, DeploymentMode};
pub use record::{DeploymentRecord, DeploymentState};
pub use registry::DeploymentRegistry;
pub use scheduler::{TimeoutCallback, TimeoutScheduler, TokioTimeoutScheduler};
