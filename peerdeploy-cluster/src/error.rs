//! Error types for cluster module

use peerdeploy_core::{DeploymentId, MemberId};
use thiserror::Error;

/// Cluster error types
///
/// The first group are rejected resolution requests. They are reported to
/// the caller as "no deployment" and never retried by the registry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Sender node left the cluster: {0}")]
    SenderLeft(MemberId),

    #[error("Deployment registry is shutting down")]
    ShuttingDown,

    #[error("Sequence number does not correspond to deployment ID [seq={seq}, deployment_id={existing}]")]
    SequenceMismatch { seq: u64, existing: DeploymentId },

    #[error("Request for a module that has been redeployed: {0}")]
    Obsolete(String),

    #[error("Failed to resolve module [alias={alias}, deployment_id={deployment_id}]")]
    AliasNotFound {
        alias: String,
        deployment_id: DeploymentId,
    },

    #[error("Deployment registry already started")]
    AlreadyStarted,

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Failed to release resolution context: {0}")]
    Release(String),

    #[error("Undeploy hook failed: {0}")]
    Hook(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether this error is a rejected resolution request
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::SenderLeft(_)
                | Self::ShuttingDown
                | Self::SequenceMismatch { .. }
                | Self::Obsolete(_)
                | Self::AliasNotFound { .. }
        )
    }
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, Error>;
