use peerdeploy_core::{DeploymentId, MemberId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::context::ResolutionContext;

/// How the sender keys its deployments
///
/// `Private` deployments are keyed by the sender's request context,
/// `Isolated` ones by an explicit ID. The registry treats both the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    #[default]
    Private,
    Isolated,
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Private => write!(f, "private"),
            Self::Isolated => write!(f, "isolated"),
        }
    }
}

/// Deployment request received with a remote execution
#[derive(Clone)]
pub struct DeploymentMetadata {
    pub id: DeploymentId,
    pub sender_id: MemberId,
    /// Strictly increasing per sender, starts at 1
    pub sequence_number: u64,
    /// Module alias the caller needs from the deployment
    pub alias: String,
    pub user_version: String,
    pub mode: DeploymentMode,
    /// Parent context for the new resolution context; the registry
    /// default is used when absent
    pub parent: Option<Arc<dyn ResolutionContext>>,
}

impl DeploymentMetadata {
    #[must_use]
    pub fn new(
        id: DeploymentId,
        sender_id: MemberId,
        sequence_number: u64,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            id,
            sender_id,
            sequence_number,
            alias: alias.into(),
            user_version: "0".to_string(),
            mode: DeploymentMode::default(),
            parent: None,
        }
    }

    #[must_use]
    pub fn with_user_version(mut self, user_version: impl Into<String>) -> Self {
        self.user_version = user_version.into();
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Arc<dyn ResolutionContext>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Panics on malformed metadata; valid callers never send it
    pub fn validate_preconditions(&self) {
        assert!(!self.id.is_empty(), "Deployment ID must not be empty: {self:?}");
        assert!(!self.sender_id.is_empty(), "Sender ID must not be empty: {self:?}");
        assert!(
            self.sequence_number > 0,
            "Invalid sequence number (must be positive): {self:?}"
        );
    }
}

impl std::fmt::Debug for DeploymentMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentMetadata")
            .field("id", &self.id)
            .field("sender_id", &self.sender_id)
            .field("sequence_number", &self.sequence_number)
            .field("alias", &self.alias)
            .field("user_version", &self.user_version)
            .field("mode", &self.mode)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
