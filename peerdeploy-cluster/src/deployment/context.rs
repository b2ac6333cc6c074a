use std::sync::Arc;

use super::metadata::DeploymentMetadata;
use crate::error::Result;

/// A materialized code unit
pub trait Module: Send + Sync + std::fmt::Debug {
    /// Fully qualified name of the unit
    fn name(&self) -> &str;

    /// Task-like units are reported with task events instead of class events
    fn is_task(&self) -> bool {
        false
    }
}

/// Code-resolution capability owned by exactly one deployment record
#[cfg_attr(test, mockall::automock)]
pub trait ResolutionContext: Send + Sync {
    /// Materialize the module behind `alias`
    ///
    /// Fails with [`Error::ModuleNotFound`](crate::Error::ModuleNotFound)
    /// when the sender cannot supply it.
    fn resolve(&self, alias: &str) -> Result<Arc<dyn Module>>;

    /// Release everything the context holds; called once on undeploy
    fn release(&self) -> Result<()>;
}

/// Builds the resolution context for a newly created deployment
///
/// Runs under the registry lock, so implementations must only construct
/// state and leave fetching of code to [`ResolutionContext::resolve`].
pub trait ContextLoader: Send + Sync {
    fn create(
        &self,
        metadata: &DeploymentMetadata,
        parent: Option<Arc<dyn ResolutionContext>>,
    ) -> Box<dyn ResolutionContext>;
}
