//! Push notifications and notification clicks.

use std::sync::Arc;

use quizcache_common::{now_millis, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::clients::{ClientMatchOptions, ClientType, SharedClients};
use crate::config::WorkerConfig;

/// Fields a push sender may set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    /// Parse raw push data. Anything that is not a JSON object becomes the
    /// notification body.
    pub fn parse(data: &[u8]) -> Self {
        match serde_json::from_slice::<Self>(data) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(error = %err, "Push data is not JSON, using it as text");
                let text = String::from_utf8_lossy(data).trim().to_string();
                Self {
                    title: None,
                    body: (!text.is_empty()).then_some(text),
                    url: None,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    pub url: String,
    pub timestamp: u64,
}

/// A notification ready to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// Incoming push message.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Vec<u8>>,
}

impl PushEvent {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }
}

/// A click on a shown notification. `action` is empty for a click on the
/// notification body.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: Notification,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Dismissed,
    Focused { client_id: String },
    Opened { client_id: String, url: Url },
}

pub struct Notifier {
    config: Arc<WorkerConfig>,
    clients: SharedClients,
}

impl Notifier {
    pub fn new(config: Arc<WorkerConfig>, clients: SharedClients) -> Self {
        Self { config, clients }
    }

    /// Build the notification for a push. Pushes without data show nothing.
    pub fn on_push(&self, event: &PushEvent) -> Option<Notification> {
        let Some(data) = event.data.as_deref() else {
            debug!("Push without data ignored");
            return None;
        };
        let notification = self.build(PushPayload::parse(data));
        info!(title = %notification.title, url = %notification.data.url, "Showing notification");
        Some(notification)
    }

    fn build(&self, payload: PushPayload) -> Notification {
        let defaults = &self.config.notifications;
        Notification {
            title: payload.title.unwrap_or_else(|| defaults.default_title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.default_body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            vibrate: defaults.vibrate.clone(),
            data: NotificationData {
                url: payload.url.unwrap_or_else(|| "/".to_string()),
                timestamp: now_millis(),
            },
            actions: vec![
                NotificationAction {
                    action: "open".into(),
                    title: "অ্যাপ ওপেন করুন".into(),
                },
                NotificationAction {
                    action: "close".into(),
                    title: "বন্ধ করুন".into(),
                },
            ],
        }
    }

    /// Focus an open window at the origin, or open one at the notification URL.
    pub async fn on_click(&self, event: &NotificationClickEvent) -> Result<ClickOutcome> {
        if event.action == "close" {
            debug!("Notification dismissed");
            return Ok(ClickOutcome::Dismissed);
        }

        let mut clients = self.clients.write().await;
        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        let existing = clients
            .match_all(&options, &self.config.version)
            .into_iter()
            .find(|c| c.url.origin() == self.config.origin.origin())
            .map(|c| c.id.clone());

        if let Some(id) = existing {
            let client = clients.focus(&id)?;
            info!(client = %client.id, "Focused existing window");
            return Ok(ClickOutcome::Focused { client_id: id });
        }

        let url = self.config.resolve(&event.notification.data.url)?;
        let client = clients.open_window(url.clone());
        Ok(ClickOutcome::Opened {
            client_id: client.id,
            url,
        })
    }
}
