//! Fixtures for registry integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use peerdeploy_cluster::deployment::TimeoutCallback;
use peerdeploy_cluster::{
    ContextLoader, DeploymentEventSink, DeploymentMetadata, DeploymentRecord, DeploymentRegistry,
    Error, Membership, MembershipEvent, Module, NodeInfo, NodeRegistry, ResolutionContext, Result,
    TimeoutScheduler,
};
use peerdeploy_core::config::DeploymentConfig;
use peerdeploy_core::{DeploymentId, MemberId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const NETWORK_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug)]
pub struct Unit {
    pub name: String,
}

impl Module for Unit {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_task(&self) -> bool {
        self.name.ends_with("Task")
    }
}

#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub resolved: AtomicUsize,
    pub released: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct FixedContext {
    known: HashSet<String>,
    counters: Arc<Counters>,
    resolve_delay: Duration,
    fail_release: bool,
}

impl ResolutionContext for FixedContext {
    fn resolve(&self, alias: &str) -> Result<Arc<dyn Module>> {
        if !self.resolve_delay.is_zero() {
            std::thread::sleep(self.resolve_delay);
        }
        if !self.known.contains(alias) {
            return Err(Error::ModuleNotFound(alias.to_string()));
        }
        self.counters.resolved.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Unit {
            name: format!("org.example.{alias}"),
        }))
    }

    fn release(&self) -> Result<()> {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(Error::Release("class loader still referenced".to_string()));
        }
        Ok(())
    }
}

/// Loader whose contexts resolve a fixed set of aliases
pub struct FixedLoader {
    known: HashSet<String>,
    pub counters: Arc<Counters>,
    resolve_delay: Duration,
    fail_release: bool,
}

impl FixedLoader {
    pub fn new(aliases: &[&str]) -> Self {
        Self {
            known: aliases.iter().map(|a| (*a).to_string()).collect(),
            counters: Arc::new(Counters::default()),
            resolve_delay: Duration::ZERO,
            fail_release: false,
        }
    }

    pub fn with_resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = delay;
        self
    }

    pub fn with_failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

impl ContextLoader for FixedLoader {
    fn create(
        &self,
        _metadata: &DeploymentMetadata,
        _parent: Option<Arc<dyn ResolutionContext>>,
    ) -> Box<dyn ResolutionContext> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Box::new(FixedContext {
            known: self.known.clone(),
            counters: self.counters.clone(),
            resolve_delay: self.resolve_delay,
            fail_release: self.fail_release,
        })
    }
}

/// Scheduler that only fires when told to
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<(Duration, TimeoutCallback)>>,
}

impl ManualScheduler {
    pub fn delays(&self) -> Vec<Duration> {
        self.pending.lock().iter().map(|(delay, _)| *delay).collect()
    }

    pub fn fire_all(&self) {
        let callbacks = std::mem::take(&mut *self.pending.lock());
        for (_, callback) in callbacks {
            callback();
        }
    }
}

impl TimeoutScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, callback: TimeoutCallback) {
        self.pending.lock().push((delay, callback));
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub deployed: Mutex<Vec<(DeploymentId, String)>>,
    pub undeployed: Mutex<Vec<(DeploymentId, Option<MemberId>)>>,
}

impl RecordingSink {
    pub fn undeployed(&self) -> Vec<(DeploymentId, Option<MemberId>)> {
        self.undeployed.lock().clone()
    }

    pub fn deployed_count(&self) -> usize {
        self.deployed.lock().len()
    }
}

impl DeploymentEventSink for RecordingSink {
    fn record_deployed(&self, record: &DeploymentRecord, alias: &str, _is_task: bool) {
        self.deployed.lock().push((record.id().clone(), alias.to_string()));
    }

    fn record_undeployed(&self, record: &DeploymentRecord, departed: Option<&MemberId>) {
        self.undeployed.lock().push((record.id().clone(), departed.cloned()));
    }
}

pub fn membership(members: &[&str]) -> Arc<NodeRegistry> {
    let registry = Arc::new(NodeRegistry::new(MemberId::from("local"), 30));
    registry.register("127.0.0.1:47500".to_string());
    for member in members {
        registry.register_remote(NodeInfo::new(MemberId::from(*member), format!("{member}:47500")));
    }
    registry
}

/// Membership whose sender leaves right after the first liveness check passes
pub struct DepartingMembership {
    pub nodes: Arc<NodeRegistry>,
    leaving: Mutex<Option<MemberId>>,
}

impl DepartingMembership {
    pub fn new(nodes: Arc<NodeRegistry>, leaving: &str) -> Self {
        Self {
            nodes,
            leaving: Mutex::new(Some(MemberId::from(leaving))),
        }
    }
}

impl Membership for DepartingMembership {
    fn is_live(&self, member_id: &MemberId) -> bool {
        let live = self.nodes.is_live(member_id);
        let mut leaving = self.leaving.lock();
        if live && leaving.as_ref() == Some(member_id) {
            leaving.take();
            self.nodes.unregister_remote(member_id);
        }
        live
    }

    fn live_members(&self) -> Vec<MemberId> {
        self.nodes.live_members()
    }

    fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.nodes.subscribe()
    }
}

pub fn config() -> DeploymentConfig {
    DeploymentConfig {
        network_timeout_ms: NETWORK_TIMEOUT.as_millis() as u64,
    }
}

pub fn registry(
    membership: Arc<NodeRegistry>,
    scheduler: Arc<dyn TimeoutScheduler>,
    loader: Arc<FixedLoader>,
    sink: Arc<RecordingSink>,
) -> DeploymentRegistry {
    DeploymentRegistry::new(&config(), membership, scheduler, loader, sink)
}

pub fn meta(id: &str, sender: &str, seq: u64, alias: &str) -> DeploymentMetadata {
    DeploymentMetadata::new(DeploymentId::from(id), MemberId::from(sender), seq, alias)
}

pub fn ids(records: &[Arc<DeploymentRecord>]) -> Vec<String> {
    records.iter().map(|r| r.id().to_string()).collect()
}
