pub mod deployment;
pub mod discovery;
pub mod error;
pub mod node;

pub use deployment::{
    BroadcastEventSink, ContextLoader, DeploymentEvent, DeploymentEventSink, DeploymentMetadata,
    DeploymentMode, DeploymentRecord, DeploymentRegistry, DeploymentState, Module,
    ResolutionContext, TimeoutScheduler, TokioTimeoutScheduler, TracingEventSink, UndeployHook,
};
pub use discovery::{FailureDetector, Membership, MembershipEvent, NodeInfo, NodeRegistry};
pub use error::{Error, Result};
pub use node::{bootstrap, DeploymentNode};
