//! Cross-Context Messenger: control messages posted by quiz pages.

use std::sync::Arc;

use http::StatusCode;
use quizcache_common::now_millis;
use quizcache_net::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::store::{CacheEntry, CacheKey, CacheStore};

/// A recognised control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    SkipWaiting,
    CacheQuizData {
        #[serde(default)]
        payload: Value,
    },
    GetCacheStatus,
}

impl ControlMessage {
    /// Parse message data. Anything that is not a known tagged object
    /// yields `None`.
    pub fn parse(data: &Value) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }
}

/// Reply to `GET_CACHE_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub total_cached: usize,
    pub cache_name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A posted message plus its optional reply port.
#[derive(Debug)]
pub struct MessageEvent {
    pub data: Value,
    pub reply: Option<oneshot::Sender<CacheStatus>>,
}

impl MessageEvent {
    pub fn new(data: Value) -> Self {
        Self { data, reply: None }
    }

    /// Attach a reply port; returns the receiving end.
    pub fn with_reply(data: Value) -> (Self, oneshot::Receiver<CacheStatus>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                data,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// What handling a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The sender asked the waiting version to activate now.
    SkipWaiting,
    QuizDataCached { bytes: usize },
    /// Storing the payload failed; already logged.
    QuizDataDropped,
    Status(CacheStatus),
    Ignored,
}

pub struct Messenger {
    config: Arc<WorkerConfig>,
    store: CacheStore,
}

impl Messenger {
    pub fn new(config: Arc<WorkerConfig>, store: CacheStore) -> Self {
        Self { config, store }
    }

    /// Handle one message event. The event is consumed.
    pub async fn handle(&self, event: MessageEvent) -> MessageOutcome {
        let Some(message) = ControlMessage::parse(&event.data) else {
            debug!(data = %event.data, "Ignoring unknown message");
            return MessageOutcome::Ignored;
        };

        match message {
            ControlMessage::SkipWaiting => {
                info!(version = %self.config.version, "Skip waiting requested");
                MessageOutcome::SkipWaiting
            }
            ControlMessage::CacheQuizData { payload } => self.cache_quiz_data(&payload).await,
            ControlMessage::GetCacheStatus => {
                let status = self.cache_status().await;
                match event.reply {
                    Some(reply) => {
                        if reply.send(status.clone()).is_err() {
                            debug!("Status requester went away before the reply");
                        }
                    }
                    None => debug!("Status requested without a reply port"),
                }
                MessageOutcome::Status(status)
            }
        }
    }

    /// Entry count of the current static generation.
    pub async fn cache_status(&self) -> CacheStatus {
        let cache_name = self.config.version.static_name();
        CacheStatus {
            total_cached: self.store.entry_count(&cache_name).await,
            cache_name,
            timestamp: now_millis(),
        }
    }

    async fn cache_quiz_data(&self, payload: &Value) -> MessageOutcome {
        let url = match self.config.resolve(&self.config.quiz_data_key) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "Quiz data key does not resolve");
                return MessageOutcome::QuizDataDropped;
            }
        };
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "Quiz data is not serializable");
                return MessageOutcome::QuizDataDropped;
            }
        };
        let bytes = body.len();
        let response = Response::synthetic(StatusCode::OK, "application/json", body).with_url(url.clone());
        let entry = CacheEntry::from_response(CacheKey::get(&url), &response, now_millis());

        let generation = self.config.version.dynamic_name();
        match self.store.put(&generation, entry).await {
            Ok(()) => {
                info!(generation = %generation, bytes, "Quiz data cached");
                MessageOutcome::QuizDataCached { bytes }
            }
            Err(err) => {
                warn!(generation = %generation, error = %err, "Failed to cache quiz data");
                MessageOutcome::QuizDataDropped
            }
        }
    }
}
