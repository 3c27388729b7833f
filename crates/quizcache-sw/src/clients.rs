//! Clients: the quiz pages a worker version controls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use quizcache_common::{OptionExt, QuizCacheError, Result};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::config::VersionDescriptor;

/// Clients shared between the host and every worker version.
pub type SharedClients = Arc<RwLock<Clients>>;

/// A client (open page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Current URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,

    /// Worker version controlling this client, if any.
    pub controller: Option<VersionDescriptor>,

    /// Creation sequence number.
    seq: u64,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

impl Client {
    /// A visible, uncontrolled window at `url`.
    pub fn window(url: Url) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("client-{seq}"),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controller: None,
            seq,
        }
    }

    /// Whether the given version controls this client.
    pub fn is_controlled_by(&self, version: &VersionDescriptor) -> bool {
        self.controller.as_ref() == Some(version)
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry behind the shared lock.
    pub fn shared() -> SharedClients {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Number of clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Clients matching `options`, as seen by `version`, in creation order.
    pub fn match_all(&self, options: &ClientMatchOptions, version: &VersionDescriptor) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.is_controlled_by(version))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by_key(|c| c.seq);
        matched
    }

    /// Open and focus a new window.
    pub fn open_window(&mut self, url: Url) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }
        let mut client = Client::window(url);
        client.focused = true;
        debug!(client = %client.id, url = %client.url, "Opened window");
        self.add(client.clone());
        client
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<&Client> {
        match self.clients.get(id).map(|c| c.client_type) {
            None => return Err(QuizCacheError::NotFound(format!("client {id}"))),
            Some(ClientType::Window) => {}
            Some(_) => {
                return Err(QuizCacheError::lifecycle("can only focus window clients"));
            }
        }
        for (client_id, client) in self.clients.iter_mut() {
            client.focused = client_id == id;
        }
        self.clients.get(id).ok_or_not_found(format!("client {id}"))
    }

    /// Make `version` the controller of every client. Returns how many
    /// clients changed controller.
    pub fn claim(&mut self, version: &VersionDescriptor) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if !client.is_controlled_by(version) {
                client.controller = Some(version.clone());
                claimed += 1;
            }
        }
        claimed
    }
}
