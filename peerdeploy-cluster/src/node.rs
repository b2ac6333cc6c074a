//! Local member bootstrap
//!
//! Wires the node registry, failure detector and deployment registry
//! from one [`Config`].

use peerdeploy_core::{logging, Config, MemberId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::deployment::{ContextLoader, DeploymentEventSink, DeploymentRegistry, TokioTimeoutScheduler};
use crate::discovery::{FailureDetector, NodeRegistry};
use crate::error::{Error, Result};

/// Load and validate configuration, then install the global subscriber
///
/// Environment variables override `config_file`, which may be absent.
pub fn bootstrap(config_file: Option<&str>) -> anyhow::Result<Config> {
    let config = Config::load(config_file)?;

    if let Err(errors) = config.validate() {
        anyhow::bail!("Invalid configuration: {}", errors.join("; "));
    }

    logging::init_logging(&config.logging)?;
    Ok(config)
}

/// A running cluster member that accepts deployments
pub struct DeploymentNode {
    membership: Arc<NodeRegistry>,
    detector: FailureDetector,
    registry: Arc<DeploymentRegistry>,
    tasks: Vec<JoinHandle<()>>,
}

impl DeploymentNode {
    /// Register the local member at `address` and start background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &Config,
        address: String,
        loader: Arc<dyn ContextLoader>,
        event_sink: Arc<dyn DeploymentEventSink>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| Error::Configuration(errors.join("; ")))?;

        let membership = Arc::new(NodeRegistry::from_config(&config.membership));
        membership.register(address);

        let scheduler = Arc::new(TokioTimeoutScheduler::current()?);
        let registry = Arc::new(DeploymentRegistry::new(
            &config.deployment,
            membership.clone(),
            scheduler,
            loader,
            event_sink,
        ));
        let listener = registry.start()?;

        let detector = FailureDetector::from_config(membership.clone(), &config.membership);
        let sweeper = detector.start();

        info!(
            node_id = %membership.node_id(),
            network_timeout_ms = config.deployment.network_timeout_ms,
            heartbeat_timeout_secs = config.membership.heartbeat_timeout_secs,
            "Deployment node started"
        );

        Ok(Self {
            membership,
            detector,
            registry,
            tasks: vec![listener, sweeper],
        })
    }

    #[must_use]
    pub fn node_id(&self) -> &MemberId {
        self.membership.node_id()
    }

    #[must_use]
    pub const fn membership(&self) -> &Arc<NodeRegistry> {
        &self.membership
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<DeploymentRegistry> {
        &self.registry
    }

    /// Undeploy everything and wait for background tasks to exit
    pub async fn shutdown(self) {
        self.detector.shutdown();
        self.registry.stop();

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        info!(node_id = %self.membership.node_id(), "Deployment node stopped");
    }
}
