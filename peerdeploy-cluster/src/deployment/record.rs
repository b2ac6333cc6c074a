use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use peerdeploy_core::{DeploymentId, MemberId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use super::context::{Module, ResolutionContext};
use super::metadata::{DeploymentMetadata, DeploymentMode};
use crate::error::{Error, Result};

/// Lifecycle of a deployment record
///
/// Transitions only move forward; `Undeployed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeploymentState {
    Active = 0,
    /// Eviction is scheduled but has not run yet
    PendingUndeploy = 1,
    Undeployed = 2,
}

impl DeploymentState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::PendingUndeploy,
            _ => Self::Undeployed,
        }
    }
}

type ModuleSlot = Arc<OnceCell<Arc<dyn Module>>>;

/// Cached state for one deployment from one sender
pub struct DeploymentRecord {
    id: DeploymentId,
    sender_id: MemberId,
    sequence_number: u64,
    user_version: String,
    mode: DeploymentMode,
    created_at: Instant,
    deployed_at: DateTime<Utc>,
    context: Box<dyn ResolutionContext>,
    /// One slot per alias; a slot is filled at most once
    slots: DashMap<String, ModuleSlot>,
    state: AtomicU8,
    released: AtomicBool,
}

impl DeploymentRecord {
    pub(crate) fn new(metadata: &DeploymentMetadata, context: Box<dyn ResolutionContext>) -> Self {
        Self {
            id: metadata.id.clone(),
            sender_id: metadata.sender_id.clone(),
            sequence_number: metadata.sequence_number,
            user_version: metadata.user_version.clone(),
            mode: metadata.mode,
            created_at: Instant::now(),
            deployed_at: Utc::now(),
            context,
            slots: DashMap::new(),
            state: AtomicU8::new(DeploymentState::Active as u8),
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &DeploymentId {
        &self.id
    }

    #[must_use]
    pub const fn sender_id(&self) -> &MemberId {
        &self.sender_id
    }

    #[must_use]
    pub const fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    #[must_use]
    pub fn user_version(&self) -> &str {
        &self.user_version
    }

    #[must_use]
    pub const fn mode(&self) -> DeploymentMode {
        self.mode
    }

    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Wall-clock creation time, reported with undeploy events
    #[must_use]
    pub const fn deployed_at(&self) -> DateTime<Utc> {
        self.deployed_at
    }

    #[must_use]
    pub fn state(&self) -> DeploymentState {
        DeploymentState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == DeploymentState::Active
    }

    #[must_use]
    pub fn is_pending_undeploy(&self) -> bool {
        self.state() == DeploymentState::PendingUndeploy
    }

    #[must_use]
    pub fn is_undeployed(&self) -> bool {
        self.state() == DeploymentState::Undeployed
    }

    /// Move the state forward to `to`
    ///
    /// Returns false if the record is already at or past `to`.
    pub(crate) fn advance_state(&self, to: DeploymentState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < to as u8).then_some(to as u8)
            })
            .is_ok()
    }

    /// Whether `alias` has already been materialized on this record
    ///
    /// Never waits for an in-flight materialization.
    #[must_use]
    pub fn has_resolved(&self, alias: &str) -> bool {
        self.slots.get(alias).is_some_and(|slot| slot.get().is_some())
    }

    #[must_use]
    pub fn resolved_module(&self, alias: &str) -> Option<Arc<dyn Module>> {
        self.slots.get(alias).and_then(|slot| slot.get().cloned())
    }

    /// Snapshot of materialized modules keyed by alias, sorted by alias
    #[must_use]
    pub fn resolved_modules(&self) -> Vec<(String, Arc<dyn Module>)> {
        let mut modules: Vec<_> = self
            .slots
            .iter()
            .filter_map(|entry| entry.value().get().map(|m| (entry.key().clone(), m.clone())))
            .collect();
        modules.sort_by(|a, b| a.0.cmp(&b.0));
        modules
    }

    #[must_use]
    pub fn resolved_aliases(&self) -> Vec<String> {
        self.resolved_modules().into_iter().map(|(alias, _)| alias).collect()
    }

    /// Whether a materialized module answers to `name`, by alias or by module name
    #[must_use]
    pub fn has_name(&self, name: &str) -> bool {
        self.slots.iter().any(|entry| {
            entry
                .value()
                .get()
                .is_some_and(|module| entry.key() == name || module.name() == name)
        })
    }

    /// Resolve `alias` against the record's context, caching the result
    ///
    /// Concurrent callers asking for the same alias share one
    /// materialization. The flag is true for the caller that performed it.
    pub fn resolve_alias(&self, alias: &str) -> Result<(Arc<dyn Module>, bool)> {
        let slot = self.slots.entry(alias.to_string()).or_default().clone();

        if let Some(module) = slot.get() {
            return Ok((module.clone(), false));
        }

        let mut materialized = false;
        let result = slot.get_or_try_init(|| {
            if self.is_undeployed() {
                return Err(Error::ModuleNotFound(format!(
                    "{alias} (deployment {} is undeployed)",
                    self.id
                )));
            }
            materialized = true;
            self.context.resolve(alias)
        });

        match result {
            Ok(module) => Ok((module.clone(), materialized)),
            Err(e) => {
                self.slots.remove_if(alias, |_, slot| slot.get().is_none());
                Err(e)
            }
        }
    }

    /// Release the resolution context; only the first call reaches it
    pub(crate) fn release_context(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.context.release()
    }
}

impl std::fmt::Debug for DeploymentRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentRecord")
            .field("id", &self.id)
            .field("sender_id", &self.sender_id)
            .field("sequence_number", &self.sequence_number)
            .field("user_version", &self.user_version)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .field("deployed_at", &self.deployed_at)
            .field("aliases", &self.resolved_aliases())
            .finish_non_exhaustive()
    }
}
