//! Cluster membership and failure detection

pub mod failure_detector;
pub mod membership;
pub mod node_registry;

pub use failure_detector::FailureDetector;
pub use membership::{Membership, MembershipEvent};
pub use node_registry::{FencingToken, NodeInfo, NodeRegistry};
