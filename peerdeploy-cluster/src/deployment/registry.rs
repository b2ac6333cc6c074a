//! Deployment registry for private and isolated deployments
//!
//! Every state change happens under one mutex guarding the record map.
//! Records that leave the map are collected while the lock is held and
//! torn down after it is released, so sinks and hooks may call back into
//! the registry.

use parking_lot::{Mutex, RwLock};
use peerdeploy_core::config::DeploymentConfig;
use peerdeploy_core::{DeploymentId, MemberId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::{ContextLoader, ResolutionContext};
use super::events::{DeploymentEventSink, UndeployHook};
use super::metadata::DeploymentMetadata;
use super::record::{DeploymentRecord, DeploymentState};
use super::scheduler::TimeoutScheduler;
use crate::discovery::Membership;
use crate::error::{Error, Result};

#[derive(Default)]
struct Cache {
    records: HashMap<DeploymentId, Arc<DeploymentRecord>>,
    stopped: bool,
}

struct Shared {
    network_timeout: Duration,
    membership: Arc<dyn Membership>,
    scheduler: Arc<dyn TimeoutScheduler>,
    loader: Arc<dyn ContextLoader>,
    event_sink: Arc<dyn DeploymentEventSink>,
    default_parent: RwLock<Option<Arc<dyn ResolutionContext>>>,
    hooks: RwLock<Vec<Arc<dyn UndeployHook>>>,
    cache: Mutex<Cache>,
}

/// Registry of deployments received from remote members
pub struct DeploymentRegistry {
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
    started: AtomicBool,
}

impl DeploymentRegistry {
    #[must_use]
    pub fn new(
        config: &DeploymentConfig,
        membership: Arc<dyn Membership>,
        scheduler: Arc<dyn TimeoutScheduler>,
        loader: Arc<dyn ContextLoader>,
        event_sink: Arc<dyn DeploymentEventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                network_timeout: config.network_timeout(),
                membership,
                scheduler,
                loader,
                event_sink,
                default_parent: RwLock::new(None),
                hooks: RwLock::new(Vec::new()),
                cache: Mutex::new(Cache::default()),
            }),
            cancel_token: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn network_timeout(&self) -> Duration {
        self.shared.network_timeout
    }

    /// Parent context for deployments whose metadata carries none
    pub fn set_default_parent(&self, parent: Option<Arc<dyn ResolutionContext>>) {
        *self.shared.default_parent.write() = parent;
    }

    pub fn add_undeploy_hook(&self, hook: Arc<dyn UndeployHook>) {
        self.shared.hooks.write().push(hook);
    }

    /// Subscribe to membership changes and evict deployments of members
    /// that left before the subscription existed
    ///
    /// Returns the `JoinHandle` of the membership listener. Fails if the
    /// registry was already started or has been stopped.
    pub fn start(&self) -> Result<tokio::task::JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Configuration(format!("Deployment registry needs a tokio runtime: {e}")))?;

        if self.shared.cache.lock().stopped {
            return Err(Error::ShuttingDown);
        }
        if self.started.swap(true, AtomicOrdering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }

        let mut events = self.shared.membership.subscribe();
        let shared = self.shared.clone();
        let cancel_token = self.cancel_token.clone();

        let handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!("Deployment membership listener shutting down");
                        return;
                    }
                    event = events.recv() => match event {
                        Ok(event) if event.is_departure() => {
                            shared.on_member_departed(event.member_id());
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Membership listener lagged, reconciling deployments");
                            shared.reconcile();
                        }
                        Err(RecvError::Closed) => {
                            info!("Membership channel closed, deployment listener exiting");
                            return;
                        }
                    }
                }
            }
        });

        let evicted = self.shared.reconcile();
        info!(
            network_timeout_ms = self.shared.network_timeout.as_millis() as u64,
            evicted,
            "Deployment registry started"
        );

        Ok(handle)
    }

    /// Undeploy everything and refuse further deployments
    pub fn stop(&self) {
        self.cancel_token.cancel();

        let drained = {
            let mut cache = self.shared.cache.lock();
            cache.stopped = true;
            Shared::drain_where(&mut cache, |_| true)
        };

        for record in &drained {
            self.shared.teardown(record, None);
        }

        info!(undeployed = drained.len(), "Deployment registry stopped");
    }

    /// Find or create the deployment for `metadata` and resolve its alias
    ///
    /// Returns `None` for rejected requests; the reason is logged.
    ///
    /// # Panics
    ///
    /// Panics on malformed metadata (empty IDs, zero sequence number).
    pub fn resolve(&self, metadata: &DeploymentMetadata) -> Option<Arc<DeploymentRecord>> {
        match self.try_resolve(metadata) {
            Ok(record) => Some(record),
            Err(e @ Error::SequenceMismatch { .. }) => {
                error!(error = %e, ?metadata, "Inconsistent deployment request");
                None
            }
            Err(e) => {
                warn!(error = %e, alias = %metadata.alias, sender_id = %metadata.sender_id, "Deployment request rejected");
                None
            }
        }
    }

    /// Like [`resolve`](Self::resolve) but returns the rejection reason
    ///
    /// # Panics
    ///
    /// Panics on malformed metadata (empty IDs, zero sequence number).
    pub fn try_resolve(&self, metadata: &DeploymentMetadata) -> Result<Arc<DeploymentRecord>> {
        metadata.validate_preconditions();

        debug!(?metadata, "Resolving deployment");

        if !self.shared.membership.is_live(&metadata.sender_id) {
            return Err(Error::SenderLeft(metadata.sender_id.clone()));
        }

        let record = self.shared.find_or_create(metadata)?;

        let (module, materialized) = record.resolve_alias(&metadata.alias).map_err(|e| {
            debug!(error = %e, deployment_id = %record.id(), "Module resolution failed");
            Error::AliasNotFound {
                alias: metadata.alias.clone(),
                deployment_id: record.id().clone(),
            }
        })?;

        if materialized {
            self.shared
                .event_sink
                .record_deployed(&record, &metadata.alias, module.is_task());
        }

        Ok(record)
    }

    #[must_use]
    pub fn get(&self, id: &DeploymentId) -> Option<Arc<DeploymentRecord>> {
        self.shared.cache.lock().records.get(id).cloned()
    }

    /// Snapshot of all cached deployments, ordered by ID
    #[must_use]
    pub fn list(&self) -> Vec<Arc<DeploymentRecord>> {
        let mut records: Vec<_> = self.shared.cache.lock().records.values().cloned().collect();
        records.sort_by(|a, b| a.id().cmp(b.id()));
        records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.cache.lock().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.cache.lock().records.is_empty()
    }

    /// Undeploy every deployment of `sender_id` that resolved `name`
    pub fn undeploy_by_name(&self, sender_id: &MemberId, name: &str) {
        let drained = {
            let mut cache = self.shared.cache.lock();
            Shared::drain_where(&mut cache, |r| r.sender_id() == sender_id && r.has_name(name))
        };

        for record in &drained {
            info!(
                deployment_id = %record.id(),
                sender_id = %sender_id,
                name,
                "Undeployed private or isolated deployment"
            );
            self.shared.teardown(record, None);
        }
    }

    /// Evict deployments whose sender is no longer a live member
    ///
    /// Returns the number of evicted deployments.
    pub fn reconcile(&self) -> usize {
        self.shared.reconcile()
    }

    /// Process a departure notification for `member_id`
    pub fn on_member_departed(&self, member_id: &MemberId) {
        self.shared.on_member_departed(member_id);
    }
}

impl Drop for DeploymentRegistry {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl Shared {
    /// Decide the outcome of a request under the lock
    fn find_or_create(self: &Arc<Self>, metadata: &DeploymentMetadata) -> Result<Arc<DeploymentRecord>> {
        let mut cache = self.cache.lock();

        if cache.stopped {
            return Err(Error::ShuttingDown);
        }

        // A departure drained before this lock was taken must not be undone
        if !self.membership.is_live(&metadata.sender_id) {
            return Err(Error::SenderLeft(metadata.sender_id.clone()));
        }

        if let Some(existing) = cache.records.get(&metadata.id) {
            if existing.sequence_number() == metadata.sequence_number {
                return Ok(existing.clone());
            }
            return Err(Error::SequenceMismatch {
                seq: metadata.sequence_number,
                existing: existing.id().clone(),
            });
        }

        // Decide first; nothing is scheduled unless the request is accepted
        let now = Instant::now();
        let mut superseded = Vec::new();
        let mut pending_delay = Duration::ZERO;

        for other in cache.records.values() {
            if other.sender_id() != &metadata.sender_id || !other.is_active() {
                continue;
            }

            match other.sequence_number().cmp(&metadata.sequence_number) {
                Ordering::Less => {
                    if other.has_resolved(&metadata.alias) {
                        superseded.push(other.clone());
                    }
                }
                Ordering::Greater => {
                    if other.has_resolved(&metadata.alias) {
                        let elapsed = now.saturating_duration_since(other.created_at());
                        if elapsed >= self.network_timeout {
                            return Err(Error::Obsolete(metadata.alias.clone()));
                        }
                        pending_delay = pending_delay.max(self.network_timeout - elapsed);
                    }
                }
                Ordering::Equal => {
                    return Err(Error::SequenceMismatch {
                        seq: metadata.sequence_number,
                        existing: other.id().clone(),
                    });
                }
            }
        }

        for other in &superseded {
            debug!(
                alias = %metadata.alias,
                new_seq = metadata.sequence_number,
                old_seq = other.sequence_number(),
                sender_id = %metadata.sender_id,
                current_id = %other.id(),
                new_id = %metadata.id,
                "Newer sequence number received, scheduling current deployment for undeploy"
            );
            self.schedule_undeploy(other, self.network_timeout);
        }

        if !pending_delay.is_zero() {
            debug!(
                alias = %metadata.alias,
                received_seq = metadata.sequence_number,
                sender_id = %metadata.sender_id,
                undeploy_in_ms = pending_delay.as_millis() as u64,
                "Stale deployment request, will deploy and schedule undeploy"
            );
        }

        let parent = metadata
            .parent
            .clone()
            .or_else(|| self.default_parent.read().clone());
        let context = self.loader.create(metadata, parent);
        let record = Arc::new(DeploymentRecord::new(metadata, context));

        cache.records.insert(metadata.id.clone(), record.clone());

        if !pending_delay.is_zero() {
            self.schedule_undeploy(&record, pending_delay);
        }

        debug!(
            deployment_id = %record.id(),
            sender_id = %record.sender_id(),
            seq = record.sequence_number(),
            mode = %record.mode(),
            "Created deployment"
        );

        Ok(record)
    }

    /// Mark `record` pending and evict it after `delay`
    ///
    /// Must be called with the cache lock held. No-op unless the record is active.
    fn schedule_undeploy(self: &Arc<Self>, record: &Arc<DeploymentRecord>, delay: Duration) {
        if !record.advance_state(DeploymentState::PendingUndeploy) {
            return;
        }

        let shared = Arc::downgrade(self);
        let record = record.clone();

        self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.on_undeploy_timeout(&record);
                }
            }),
        );
    }

    /// Scheduled eviction; silent if another path already undeployed the record
    fn on_undeploy_timeout(&self, record: &Arc<DeploymentRecord>) {
        let removed = {
            let mut cache = self.cache.lock();
            if record.advance_state(DeploymentState::Undeployed) {
                if cache
                    .records
                    .get(record.id())
                    .is_some_and(|cached| Arc::ptr_eq(cached, record))
                {
                    cache.records.remove(record.id());
                }
                true
            } else {
                false
            }
        };

        if removed {
            debug!(deployment_id = %record.id(), "Undeployed superseded deployment");
            self.teardown(record, None);
        }
    }

    fn on_member_departed(&self, member_id: &MemberId) {
        let drained = {
            let mut cache = self.cache.lock();
            Self::drain_where(&mut cache, |r| r.sender_id() == member_id)
        };

        if !drained.is_empty() {
            info!(
                sender_id = %member_id,
                undeployed = drained.len(),
                "Sender left cluster, undeploying its deployments"
            );
        }

        for record in &drained {
            self.teardown(record, Some(member_id));
        }
    }

    fn reconcile(&self) -> usize {
        let drained = {
            let mut cache = self.cache.lock();
            Self::drain_where(&mut cache, |r| !self.membership.is_live(r.sender_id()))
        };

        for record in &drained {
            info!(
                deployment_id = %record.id(),
                sender_id = %record.sender_id(),
                "Undeploying deployment of obsolete sender"
            );
            self.teardown(record, None);
        }

        drained.len()
    }

    /// Remove matching records and mark them undeployed
    fn drain_where(
        cache: &mut Cache,
        matches: impl Fn(&DeploymentRecord) -> bool,
    ) -> Vec<Arc<DeploymentRecord>> {
        let mut drained = Vec::new();
        cache.records.retain(|_, record| {
            if matches(record.as_ref()) {
                record.advance_state(DeploymentState::Undeployed);
                drained.push(record.clone());
                false
            } else {
                true
            }
        });
        drained
    }

    /// Notify and release a record that already left the map
    ///
    /// Must be called without the cache lock. Failures are logged only.
    fn teardown(&self, record: &DeploymentRecord, departed: Option<&MemberId>) {
        self.event_sink.record_undeployed(record, departed);

        let hooks = self.hooks.read().clone();
        for hook in hooks {
            if let Err(e) = hook.on_undeployed(record, departed) {
                warn!(deployment_id = %record.id(), error = %e, "Undeploy hook failed");
            }
        }

        if let Err(e) = record.release_context() {
            warn!(deployment_id = %record.id(), error = %e, "Failed to release resolution context");
        }
    }
}
