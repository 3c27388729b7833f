//! Worker host: deploys versions and routes page events to them.
//!
//! ```text
//! WorkerHost
//!     ├── Registration   (installing / waiting / active slots)
//!     ├── ServiceWorker  per live version
//!     ├── CacheStore     (shared by every version)
//!     ├── Clients        (shared by every version)
//!     └── Sweeper        (expiry task of the active version)
//! ```
//!
//! Deploys, activations and unregistration run one at a time behind the
//! lifecycle lock. Fetches never take it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use quizcache_common::{now_millis, QuizCacheError, Result};
use quizcache_net::{Network, Request, Response};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{Clients, SharedClients};
use crate::config::{VersionDescriptor, WorkerConfig};
use crate::dispatch::WorkerEvent;
use crate::expiry::{self, Sweeper};
use crate::fetch::FetchOutcome;
use crate::install::InstallReport;
use crate::lifecycle::{Registration, WorkerId, WorkerState, WorkerVersion};
use crate::messenger::{MessageEvent, MessageOutcome};
use crate::notify::{ClickOutcome, Notification, NotificationClickEvent, PushEvent};
use crate::reaper::ReapReport;
use crate::store::CacheStore;
use crate::worker::ServiceWorker;

/// Host-level notifications.
#[derive(Debug, Clone)]
pub enum HostEvent {
    StateChange {
        worker: WorkerId,
        version: VersionDescriptor,
        state: WorkerState,
    },
    InstallFailed {
        version: VersionDescriptor,
        error: String,
    },
    ControllerChange {
        version: VersionDescriptor,
        claimed: usize,
    },
    NotificationShown(Notification),
    NetworkStatus {
        online: bool,
    },
}

/// Result of [`WorkerHost::deploy`].
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub worker: WorkerId,
    pub install: InstallReport,
    /// Present when the version activated immediately.
    pub activation: Option<ReapReport>,
}

/// Owns the registration and every live worker version.
#[derive(Clone)]
pub struct WorkerHost {
    registration: Arc<RwLock<Registration>>,
    workers: Arc<RwLock<HashMap<WorkerId, Arc<ServiceWorker>>>>,
    store: CacheStore,
    network: Arc<dyn Network>,
    clients: SharedClients,
    online: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
    lifecycle: Arc<Mutex<()>>,
    sweeper: Arc<Mutex<Option<Sweeper>>>,
}

impl WorkerHost {
    /// Create a host for `scope`.
    pub fn new(
        scope: Url,
        store: CacheStore,
        network: Arc<dyn Network>,
    ) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registration: Arc::new(RwLock::new(Registration::new(scope))),
                workers: Arc::new(RwLock::new(HashMap::new())),
                store,
                network,
                clients: Clients::shared(),
                online: Arc::new(AtomicBool::new(true)),
                event_tx,
                lifecycle: Arc::new(Mutex::new(())),
                sweeper: Arc::new(Mutex::new(None)),
            },
            event_rx,
        )
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn clients(&self) -> &SharedClients {
        &self.clients
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn emit(&self, event: HostEvent) {
        // No receiver just means nobody is listening.
        let _ = self.event_tx.send(event);
    }

    fn emit_state(&self, worker: &WorkerVersion) {
        self.emit(HostEvent::StateChange {
            worker: worker.id,
            version: worker.version.clone(),
            state: worker.state,
        });
    }

    async fn retire(&self, retired: Option<WorkerVersion>) {
        if let Some(worker) = retired {
            self.workers.write().await.remove(&worker.id);
            self.emit_state(&worker);
        }
    }

    /// Install a new version and, if it asks to skip waiting, activate it.
    ///
    /// A failed install discards the new version and leaves the active one
    /// in place.
    pub async fn deploy(&self, config: WorkerConfig) -> Result<DeployReport> {
        config.validate()?;
        let config = Arc::new(config);
        let _lifecycle = self.lifecycle.lock().await;
        let version = config.version.clone();

        let (id, displaced) = {
            let mut registration = self.registration.write().await;
            let (id, displaced) = registration.update(version.clone());
            if let Some(installing) = registration.installing.as_ref() {
                self.emit_state(installing);
            }
            (id, displaced)
        };
        self.retire(displaced).await;
        info!(worker = %id, version = %version, "Deploying worker version");

        let worker = Arc::new(ServiceWorker::new(
            config,
            self.store.clone(),
            self.network.clone(),
            self.clients.clone(),
        ));

        let install = match worker.install().await {
            Ok(report) => report,
            Err(err) => {
                let failed = self.registration.write().await.install_failed(id, err.to_string());
                if let Some(failed) = failed {
                    self.emit_state(&failed);
                }
                self.emit(HostEvent::InstallFailed {
                    version,
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let displaced = {
            let mut registration = self.registration.write().await;
            if registration.installing.as_ref().map(|w| w.id) != Some(id) {
                warn!(worker = %id, version = %version, "Install finished after being superseded");
                return Err(QuizCacheError::lifecycle(format!(
                    "version {version} was superseded while installing"
                )));
            }
            let displaced = registration.install_complete(id);
            if let Some(waiting) = registration.waiting.as_ref() {
                self.emit_state(waiting);
            }
            displaced
        };
        self.workers.write().await.insert(id, worker);
        self.retire(displaced).await;

        let activation = if install.skip_waiting {
            Some(self.activate_locked().await?)
        } else {
            debug!(worker = %id, "Installed, waiting for skip-waiting");
            None
        };

        Ok(DeployReport {
            worker: id,
            install,
            activation,
        })
    }

    /// Activate the waiting version: reap stale generations, claim clients,
    /// then promote it to active.
    pub async fn activate_waiting(&self) -> Result<ReapReport> {
        let _lifecycle = self.lifecycle.lock().await;
        self.activate_locked().await
    }

    /// Caller holds the lifecycle lock.
    async fn activate_locked(&self) -> Result<ReapReport> {
        let id = {
            let mut registration = self.registration.write().await;
            let waiting = registration
                .begin_activation()
                .ok_or_else(|| QuizCacheError::lifecycle("no waiting version to activate"))?;
            self.emit_state(waiting);
            waiting.id
        };
        let worker = self
            .workers
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| QuizCacheError::internal(format!("{id} has no live worker")))?;

        let report = worker.activate().await?;

        let retired = {
            let mut registration = self.registration.write().await;
            let retired = registration.activate(id)?;
            if let Some(active) = registration.active.as_ref() {
                self.emit_state(active);
            }
            retired
        };
        self.retire(retired).await;
        self.restart_sweeper(&worker).await;
        self.emit(HostEvent::ControllerChange {
            version: worker.version().clone(),
            claimed: report.claimed,
        });
        Ok(report)
    }

    async fn active_worker(&self) -> Option<Arc<ServiceWorker>> {
        let id = self.registration.read().await.active.as_ref()?.id;
        self.workers.read().await.get(&id).cloned()
    }

    async fn waiting_worker(&self) -> Option<Arc<ServiceWorker>> {
        let id = self.registration.read().await.waiting.as_ref()?.id;
        self.workers.read().await.get(&id).cloned()
    }

    /// Version currently controlling fetches.
    pub async fn active_version(&self) -> Option<VersionDescriptor> {
        let registration = self.registration.read().await;
        registration.active.as_ref().map(|w| w.version.clone())
    }

    pub async fn waiting_version(&self) -> Option<VersionDescriptor> {
        let registration = self.registration.read().await;
        registration.waiting.as_ref().map(|w| w.version.clone())
    }

    pub async fn state_of(&self, id: WorkerId) -> Option<WorkerState> {
        self.registration.read().await.find(id).map(|w| w.state)
    }

    /// Route a request through the active version.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchOutcome> {
        match self.active_worker().await {
            Some(worker) => worker.fetch(request).await,
            None => Ok(FetchOutcome::Passthrough),
        }
    }

    /// Fetch as a page would: intercepted when a version is active, straight
    /// to the network otherwise.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        match self.handle_fetch(request.clone()).await?.into_response() {
            Some(response) => Ok(response),
            None => Ok(self.network.fetch(&request).await?),
        }
    }

    /// Post a message to the active version, or the waiting one when nothing
    /// is active yet. `SKIP_WAITING` activates the waiting version.
    pub async fn post_message(&self, event: MessageEvent) -> Result<MessageOutcome> {
        let target = match self.active_worker().await {
            Some(worker) => worker,
            None => self
                .waiting_worker()
                .await
                .ok_or_else(|| QuizCacheError::lifecycle("no worker to receive the message"))?,
        };

        let outcome = target.message(event).await?;
        if outcome == MessageOutcome::SkipWaiting {
            let _lifecycle = self.lifecycle.lock().await;
            if self.waiting_version().await.is_some() {
                self.activate_locked().await?;
            } else {
                debug!("Skip waiting with nothing waiting");
            }
        }
        Ok(outcome)
    }

    pub async fn push(&self, event: PushEvent) -> Result<Option<Notification>> {
        let Some(worker) = self.active_worker().await else {
            debug!("Push with no active worker dropped");
            return Ok(None);
        };
        let notification = worker.push(event).await?;
        if let Some(notification) = &notification {
            self.emit(HostEvent::NotificationShown(notification.clone()));
        }
        Ok(notification)
    }

    pub async fn notification_click(&self, event: NotificationClickEvent) -> Result<ClickOutcome> {
        let worker = self
            .active_worker()
            .await
            .ok_or_else(|| QuizCacheError::lifecycle("no active worker for notification click"))?;
        worker.notification_click(event).await
    }

    /// Record a connectivity change and tell the active version.
    pub async fn set_online(&self, online: bool) -> Result<()> {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return Ok(());
        }
        self.emit(HostEvent::NetworkStatus { online });
        if let Some(worker) = self.active_worker().await {
            let event = if online {
                WorkerEvent::Online
            } else {
                WorkerEvent::Offline
            };
            worker.dispatch(event).await?;
        }
        Ok(())
    }

    /// Purge expired dynamic entries of the active version.
    pub async fn sweep_expired(&self) -> usize {
        let Some(worker) = self.active_worker().await else {
            return 0;
        };
        let config = worker.config();
        expiry::purge_expired(&self.store, &config.version, &config.expiry, now_millis()).await
    }

    /// Replace the running sweeper with one for `worker`, or stop it when
    /// the new version disables expiry.
    async fn restart_sweeper(&self, worker: &ServiceWorker) {
        let config = worker.config();
        let next = config
            .expiry
            .enabled
            .then(|| Sweeper::spawn(self.store.clone(), config.version.clone(), config.expiry.clone()));
        // The previous task is aborted on drop.
        *self.sweeper.lock().await = next;
    }

    /// Version the background expiry sweeper is purging, if one runs.
    pub async fn sweeper_version(&self) -> Option<VersionDescriptor> {
        self.sweeper.lock().await.as_ref().map(|s| s.version().clone())
    }

    /// Drop every version. Cached generations stay in the store.
    pub async fn unregister(&self) -> usize {
        let _lifecycle = self.lifecycle.lock().await;
        self.sweeper.lock().await.take();
        let retired = self.registration.write().await.unregister();
        let count = retired.len();
        for worker in retired {
            self.retire(Some(worker)).await;
        }
        count
    }
}
