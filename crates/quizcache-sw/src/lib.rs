//! # QuizCache Service Worker
//!
//! Offline caching layer for the SSC quiz shell.
//!
//! ## Features
//!
//! - **Versioned generations**: `static-{tag}` for the install-time shell,
//!   `dynamic-{tag}` for responses captured at runtime
//! - **All-or-nothing install**: a version with one missing asset is discarded
//! - **Activation cleanup**: stale generations are deleted and clients claimed
//! - **Cache-first fetch**: with per-category offline fallbacks
//! - **Control messages**: `SKIP_WAITING`, `CACHE_QUIZ_DATA`, `GET_CACHE_STATUS`
//! - **Push notifications** and notification clicks
//! - **Expiry**: age-based purge of dynamic entries
//! - **Snapshots**: the store survives restarts as a JSON file
//!
//! ## Architecture
//!
//! ```text
//! WorkerHost
//!     ├── Registration ── installing / waiting / active
//!     └── ServiceWorker (per version)
//!             └── Dispatcher: EventKind → EventHandler
//!                     ├── Install      → InstallCoordinator
//!                     ├── Activate     → GenerationReaper
//!                     ├── Fetch        → FetchInterceptor
//!                     ├── Message      → Messenger
//!                     ├── Push / Click → Notifier
//!                     └── Online / Offline → NetworkStatusHandler
//!
//! CacheStore (shared)
//!     └── Generation
//!             └── CacheKey → CacheEntry
//! ```

pub mod clients;
pub mod config;
pub mod dispatch;
pub mod expiry;
pub mod fetch;
pub mod host;
pub mod install;
pub mod lifecycle;
pub mod messenger;
pub mod notify;
pub mod reaper;
pub mod store;
pub mod worker;

pub use clients::{Client, ClientMatchOptions, ClientType, Clients, SharedClients, VisibilityState};
pub use config::{
    ConfigError, ExpiryConfig, FallbackConfig, HttpConfig, NotificationConfig, QuotaConfig,
    VersionDescriptor, WorkerConfig, DEFAULT_STATIC_ASSETS,
};
pub use dispatch::{Dispatcher, EventHandler, EventKind, NetworkStatusHandler, Outcome, WorkerEvent};
pub use expiry::{purge_expired, Sweeper};
pub use fetch::{is_cacheable, FallbackCategory, FetchInterceptor, FetchOutcome};
pub use host::{DeployReport, HostEvent, WorkerHost};
pub use install::{InstallCoordinator, InstallError, InstallReport};
pub use lifecycle::{Registration, WorkerId, WorkerState, WorkerVersion};
pub use messenger::{CacheStatus, ControlMessage, MessageEvent, MessageOutcome, Messenger};
pub use notify::{
    ClickOutcome, Notification, NotificationAction, NotificationClickEvent, NotificationData, Notifier,
    PushEvent, PushPayload,
};
pub use reaper::{GenerationReaper, ReapReport};
pub use store::{CacheEntry, CacheError, CacheKey, CacheStorage, CacheStore, Generation};
pub use worker::ServiceWorker;
