//! Event dispatch table.
//!
//! Each worker version owns a [`Dispatcher`] mapping [`EventKind`] to the
//! [`EventHandler`] responsible for it. Events with no registered handler are
//! reported as [`Outcome::Unhandled`].

use std::sync::Arc;

use futures::future::BoxFuture;
use hashbrown::HashMap;
use quizcache_common::{QuizCacheError, Result};
use quizcache_net::Request;
use tracing::{debug, info};

use crate::fetch::{FetchInterceptor, FetchOutcome};
use crate::install::{InstallCoordinator, InstallReport};
use crate::messenger::{MessageEvent, MessageOutcome, Messenger};
use crate::notify::{ClickOutcome, Notification, NotificationClickEvent, Notifier, PushEvent};
use crate::reaper::{GenerationReaper, ReapReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Message,
    Push,
    NotificationClick,
    Online,
    Offline,
}

/// An event delivered to a worker version.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(MessageEvent),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
    Online,
    Offline,
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Message(_) => EventKind::Message,
            WorkerEvent::Push(_) => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
            WorkerEvent::Online => EventKind::Online,
            WorkerEvent::Offline => EventKind::Offline,
        }
    }
}

/// Result of handling one event.
#[derive(Debug)]
pub enum Outcome {
    Installed(InstallReport),
    Activated(ReapReport),
    Fetch(FetchOutcome),
    Message(MessageOutcome),
    Notification(Option<Notification>),
    Click(ClickOutcome),
    NetworkStatus { online: bool },
    Unhandled(EventKind),
}

/// Handles one or more kinds of [`WorkerEvent`].
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: WorkerEvent) -> BoxFuture<'_, Result<Outcome>>;
}

fn unexpected(handler: &str, event: &WorkerEvent) -> QuizCacheError {
    QuizCacheError::internal(format!("{handler} cannot handle {:?} events", event.kind()))
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> Result<Outcome> {
        let kind = event.kind();
        match self.handlers.get(&kind) {
            Some(handler) => handler.handle(event).await,
            None => {
                debug!(?kind, "No handler registered");
                Ok(Outcome::Unhandled(kind))
            }
        }
    }
}

impl EventHandler for InstallCoordinator {
    fn handle(&self, event: WorkerEvent) -> BoxFuture<'_, Result<Outcome>> {
        Box::pin(async move {
            match event {
                WorkerEvent::Install => self.install().await.map(Outcome::Installed).map_err(|err| {
                    QuizCacheError::install_with_source(self.version().to_string(), err)
                }),
                other => Err(unexpected("install coordinator", &other)),
            }
        })
    }
}

impl EventHandler for GenerationReaper {
    fn handle(&self, event: WorkerEvent) -> BoxFuture<'_, Result<Outcome>> {
        Box::pin(async move {
            match event {
                WorkerEvent::Activate => Ok(Outcome::Activated(self.activate().await)),
                other => Err(unexpected("generation reaper", &other)),
            }
        })
    }
}

impl EventHandler for FetchInterceptor {
    fn handle(&self, event: WorkerEvent) -> BoxFuture<'_, Result<Outcome>> {
        Box::pin(async move {
            match event {
                WorkerEvent::Fetch(request) => Ok(Outcome::Fetch(FetchInterceptor::handle(self, &request).await)),
                other => Err(unexpected("fetch interceptor", &other)),
            }
        })
    }
}

impl EventHandler for Messenger {
    fn handle(&self, event: WorkerEvent) -> BoxFuture<'_, Result<Outcome>> {
        Box::pin(async move {
            match event {
                WorkerEvent::Message(message) => Ok(Outcome::Message(Messenger::handle(self, message).await)),
                other => Err(unexpected("messenger", &other)),
            }
        })
    }
}

impl EventHandler for Notifier {
    fn handle(&self, event: WorkerEvent) -> BoxFuture<'_, Result<Outcome>> {
        Box::pin(async move {
            match event {
                WorkerEvent::Push(push) => Ok(Outcome::Notification(self.on_push(&push))),
                WorkerEvent::NotificationClick(click) => self.on_click(&click).await.map(Outcome::Click),
                other => Err(unexpected("notifier", &other)),
            }
        })
    }
}

/// Logs connectivity changes.
#[derive(Debug, Default)]
pub struct NetworkStatusHandler;

impl EventHandler for NetworkStatusHandler {
    fn handle(&self, event: WorkerEvent) -> BoxFuture<'_, Result<Outcome>> {
        Box::pin(async move {
            let online = match event {
                WorkerEvent::Online => true,
                WorkerEvent::Offline => false,
                other => return Err(unexpected("network status handler", &other)),
            };
            info!(online, "Network status changed");
            Ok(Outcome::NetworkStatus { online })
        })
    }
}
