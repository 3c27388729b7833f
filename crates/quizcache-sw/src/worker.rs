//! One worker version with its dispatch table.

use std::sync::Arc;

use quizcache_common::{QuizCacheError, Result};
use quizcache_net::{Network, Request};

use crate::clients::SharedClients;
use crate::config::{VersionDescriptor, WorkerConfig};
use crate::dispatch::{Dispatcher, EventHandler, EventKind, NetworkStatusHandler, Outcome, WorkerEvent};
use crate::fetch::{FetchInterceptor, FetchOutcome};
use crate::install::{InstallCoordinator, InstallReport};
use crate::messenger::{MessageEvent, MessageOutcome, Messenger};
use crate::notify::{ClickOutcome, Notification, NotificationClickEvent, Notifier, PushEvent};
use crate::reaper::{GenerationReaper, ReapReport};
use crate::store::CacheStore;

/// A worker version: its config plus handlers for every event kind.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    dispatcher: Dispatcher,
}

impl ServiceWorker {
    /// Build the default dispatch table for `config`.
    pub fn new(
        config: Arc<WorkerConfig>,
        store: CacheStore,
        network: Arc<dyn Network>,
        clients: SharedClients,
    ) -> Self {
        let version = config.version.clone();
        let mut dispatcher = Dispatcher::new();

        let installer: Arc<dyn EventHandler> =
            Arc::new(InstallCoordinator::new(config.clone(), store.clone(), network.clone()));
        let reaper: Arc<dyn EventHandler> =
            Arc::new(GenerationReaper::new(version, store.clone(), clients.clone()));
        let interceptor: Arc<dyn EventHandler> =
            Arc::new(FetchInterceptor::new(config.clone(), store.clone(), network));
        let messenger: Arc<dyn EventHandler> = Arc::new(Messenger::new(config.clone(), store));
        let notifier: Arc<dyn EventHandler> = Arc::new(Notifier::new(config.clone(), clients));
        let status: Arc<dyn EventHandler> = Arc::new(NetworkStatusHandler);

        dispatcher
            .register(EventKind::Install, installer)
            .register(EventKind::Activate, reaper)
            .register(EventKind::Fetch, interceptor)
            .register(EventKind::Message, messenger)
            .register(EventKind::Push, notifier.clone())
            .register(EventKind::NotificationClick, notifier)
            .register(EventKind::Online, status.clone())
            .register(EventKind::Offline, status);

        Self { config, dispatcher }
    }

    /// Use a custom dispatch table.
    pub fn with_dispatcher(config: Arc<WorkerConfig>, dispatcher: Dispatcher) -> Self {
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn version(&self) -> &VersionDescriptor {
        &self.config.version
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> Result<Outcome> {
        self.dispatcher.dispatch(event).await
    }

    pub async fn install(&self) -> Result<InstallReport> {
        match self.dispatch(WorkerEvent::Install).await? {
            Outcome::Installed(report) => Ok(report),
            other => Err(mismatch(EventKind::Install, &other)),
        }
    }

    pub async fn activate(&self) -> Result<ReapReport> {
        match self.dispatch(WorkerEvent::Activate).await? {
            Outcome::Activated(report) => Ok(report),
            other => Err(mismatch(EventKind::Activate, &other)),
        }
    }

    /// Fetch through this version. An unhandled fetch passes through.
    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome> {
        match self.dispatch(WorkerEvent::Fetch(request)).await? {
            Outcome::Fetch(outcome) => Ok(outcome),
            Outcome::Unhandled(_) => Ok(FetchOutcome::Passthrough),
            other => Err(mismatch(EventKind::Fetch, &other)),
        }
    }

    pub async fn message(&self, event: MessageEvent) -> Result<MessageOutcome> {
        match self.dispatch(WorkerEvent::Message(event)).await? {
            Outcome::Message(outcome) => Ok(outcome),
            Outcome::Unhandled(_) => Ok(MessageOutcome::Ignored),
            other => Err(mismatch(EventKind::Message, &other)),
        }
    }

    pub async fn push(&self, event: PushEvent) -> Result<Option<Notification>> {
        match self.dispatch(WorkerEvent::Push(event)).await? {
            Outcome::Notification(notification) => Ok(notification),
            Outcome::Unhandled(_) => Ok(None),
            other => Err(mismatch(EventKind::Push, &other)),
        }
    }

    pub async fn notification_click(&self, event: NotificationClickEvent) -> Result<ClickOutcome> {
        match self.dispatch(WorkerEvent::NotificationClick(event)).await? {
            Outcome::Click(outcome) => Ok(outcome),
            Outcome::Unhandled(_) => Ok(ClickOutcome::Dismissed),
            other => Err(mismatch(EventKind::NotificationClick, &other)),
        }
    }
}

fn mismatch(kind: EventKind, outcome: &Outcome) -> QuizCacheError {
    QuizCacheError::internal(format!("{kind:?} handler produced {outcome:?}"))
}
