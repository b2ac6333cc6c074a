//! Heartbeat-based failure detection
//!
//! Periodically sweeps the node registry and fails nodes whose heartbeat
//! expired, which in turn notifies every membership subscriber.

use peerdeploy_core::config::MembershipConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::node_registry::NodeRegistry;

pub struct FailureDetector {
    node_registry: Arc<NodeRegistry>,
    check_interval: Duration,
    cancel_token: CancellationToken,
}

impl FailureDetector {
    #[must_use]
    pub fn new(node_registry: Arc<NodeRegistry>, check_interval: Duration) -> Self {
        Self {
            node_registry,
            check_interval,
            cancel_token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn from_config(node_registry: Arc<NodeRegistry>, config: &MembershipConfig) -> Self {
        Self::new(node_registry, Duration::from_secs(config.check_interval_secs))
    }

    /// Start the detection loop
    ///
    /// Returns the `JoinHandle` so the caller can detect panics or task completion.
    /// Use `shutdown()` to gracefully stop the loop.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.node_registry.clone();
        let cancel_token = self.cancel_token.clone();
        let mut timer = interval(self.check_interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        tracing::info!("Failure detector shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        let failed = registry.evict_stale();
                        if !failed.is_empty() {
                            tracing::debug!(count = failed.len(), "Failure detector evicted stale nodes");
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
