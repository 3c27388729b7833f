//! Worker version lifecycle and registration slots.
//!
//! ```text
//! Registration
//!     ├── installing ── Parsed → Installing ──┬─→ Redundant (install failed)
//!     ├── waiting    ── Installed             │
//!     └── active     ── Activating → Activated ─→ Redundant (replaced)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use quizcache_common::{QuizCacheError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::VersionDescriptor;

/// Unique identifier for a deployed worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting to activate.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Install failed or replaced by a newer version.
    Redundant,
}

/// One deployed worker version.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: WorkerId,
    pub version: VersionDescriptor,
    pub state: WorkerState,
    /// Why the version became redundant, if it failed.
    pub error: Option<String>,
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    fn new(version: VersionDescriptor) -> Self {
        Self {
            id: WorkerId::new(),
            version,
            state: WorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerState) {
        debug!(worker = %self.id, version = %self.version, from = ?self.state, to = ?state, "Worker state change");
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

/// The installing / waiting / active slots for one scope.
#[derive(Debug)]
pub struct Registration {
    pub scope: Url,
    pub installing: Option<WorkerVersion>,
    pub waiting: Option<WorkerVersion>,
    pub active: Option<WorkerVersion>,
    pub last_update: Option<Instant>,
}

impl Registration {
    /// Create an empty registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update: None,
        }
    }

    /// Start installing a new version. A version already installing is
    /// replaced and returned as redundant.
    pub fn update(&mut self, version: VersionDescriptor) -> (WorkerId, Option<WorkerVersion>) {
        let displaced = self.installing.take().map(|mut old| {
            old.set_state(WorkerState::Redundant);
            old
        });
        let mut worker = WorkerVersion::new(version);
        worker.set_state(WorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        self.last_update = Some(Instant::now());
        (id, displaced)
    }

    /// Move the installing version to waiting. A previously waiting version
    /// becomes redundant and is returned.
    pub fn install_complete(&mut self, id: WorkerId) -> Option<WorkerVersion> {
        let mut worker = self.installing.take_if_id(id)?;
        worker.set_state(WorkerState::Installed);
        self.waiting.replace(worker).map(|mut old| {
            old.set_state(WorkerState::Redundant);
            old
        })
    }

    /// Discard the installing version after a failed install.
    pub fn install_failed(&mut self, id: WorkerId, error: impl Into<String>) -> Option<WorkerVersion> {
        let mut worker = self.installing.take_if_id(id)?;
        let error = error.into();
        warn!(worker = %worker.id, version = %worker.version, %error, "Install failed, version discarded");
        worker.error = Some(error);
        worker.set_state(WorkerState::Redundant);
        Some(worker)
    }

    /// Mark the waiting version as activating.
    pub fn begin_activation(&mut self) -> Option<&WorkerVersion> {
        let worker = self.waiting.as_mut()?;
        worker.set_state(WorkerState::Activating);
        Some(worker)
    }

    /// Promote the waiting version `id` to active. Returns the replaced
    /// active version, now redundant.
    ///
    /// Fails without touching any slot if `id` is no longer waiting.
    pub fn activate(&mut self, id: WorkerId) -> Result<Option<WorkerVersion>> {
        let mut worker = self
            .waiting
            .take_if_id(id)
            .ok_or_else(|| QuizCacheError::lifecycle(format!("{id} is no longer waiting")))?;
        worker.set_state(WorkerState::Activated);
        Ok(self.active.replace(worker).map(|mut old| {
            old.set_state(WorkerState::Redundant);
            old
        }))
    }

    /// Find a version in any slot.
    pub fn find(&self, id: WorkerId) -> Option<&WorkerVersion> {
        [&self.installing, &self.waiting, &self.active]
            .into_iter()
            .flatten()
            .find(|w| w.id == id)
    }

    /// Clear every slot, marking each version redundant.
    pub fn unregister(&mut self) -> Vec<WorkerVersion> {
        [self.installing.take(), self.waiting.take(), self.active.take()]
            .into_iter()
            .flatten()
            .map(|mut w| {
                w.set_state(WorkerState::Redundant);
                w
            })
            .collect()
    }
}

trait TakeIfId {
    fn take_if_id(&mut self, id: WorkerId) -> Option<WorkerVersion>;
}

impl TakeIfId for Option<WorkerVersion> {
    fn take_if_id(&mut self, id: WorkerId) -> Option<WorkerVersion> {
        if self.as_ref().map(|w| w.id) == Some(id) {
            self.take()
        } else {
            None
        }
    }
}
