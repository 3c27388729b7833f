//! Install Coordinator: populates a version's static generation.

use std::sync::Arc;

use futures::future::try_join_all;
use http::StatusCode;
use quizcache_common::{now_millis, retry_if};
use quizcache_net::{NetError, Network, Request};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ConfigError, VersionDescriptor, WorkerConfig};
use crate::store::{CacheEntry, CacheError, CacheKey, CacheStore};

/// Why an install failed.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    InvalidAsset(#[from] ConfigError),

    #[error("Fetching {url} failed: {source}")]
    Network {
        url: Url,
        #[source]
        source: NetError,
    },

    #[error("Fetching {url} returned {status}")]
    BadStatus { url: Url, status: StatusCode },

    #[error("Storing static assets failed: {0}")]
    Storage(#[from] CacheError),
}

impl InstallError {
    /// Transport failures and transient statuses (5xx, 408, 429) may succeed
    /// on another attempt. Anything else fails the install at once.
    pub fn is_retryable(&self) -> bool {
        match self {
            InstallError::Network { source, .. } => source.is_retryable(),
            InstallError::BadStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            InstallError::InvalidAsset(_) | InstallError::Storage(_) => false,
        }
    }
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Static generation that was populated.
    pub generation: String,
    /// Distinct entries written.
    pub cached: usize,
    /// Whether the new version asked to activate immediately.
    pub skip_waiting: bool,
}

/// Fetches every static asset and commits them as one batch.
pub struct InstallCoordinator {
    config: Arc<WorkerConfig>,
    store: CacheStore,
    network: Arc<dyn Network>,
}

impl InstallCoordinator {
    pub fn new(config: Arc<WorkerConfig>, store: CacheStore, network: Arc<dyn Network>) -> Self {
        Self {
            config,
            store,
            network,
        }
    }

    pub fn version(&self) -> &VersionDescriptor {
        &self.config.version
    }

    /// Run the install step.
    ///
    /// Assets are fetched concurrently. Nothing is written until every fetch
    /// has succeeded, so a failure leaves the store exactly as it was.
    pub async fn install(&self) -> Result<InstallReport, InstallError> {
        let version = &self.config.version;
        let generation = version.static_name();
        let urls = self.config.static_urls()?;
        info!(version = %version, generation = %generation, assets = urls.len(), "Installing");

        let entries = try_join_all(urls.into_iter().map(|url| self.fetch_asset(url))).await?;
        let cached = {
            let mut keys: Vec<&CacheKey> = entries.iter().map(|e| &e.key).collect();
            keys.sort();
            keys.dedup();
            keys.len()
        };

        self.store.put_all(&generation, entries).await?;
        info!(version = %version, generation = %generation, cached, "Install complete");

        Ok(InstallReport {
            generation,
            cached,
            skip_waiting: self.config.skip_waiting_on_install,
        })
    }

    async fn fetch_asset(&self, url: Url) -> Result<CacheEntry, InstallError> {
        let attempt = || {
            let url = url.clone();
            async move {
                let request = Request::get(url.clone());
                let response = self
                    .network
                    .fetch(&request)
                    .await
                    .map_err(|source| InstallError::Network {
                        url: url.clone(),
                        source,
                    })?;
                if !response.ok() {
                    warn!(url = %url, status = %response.status, "Static asset not OK");
                    return Err(InstallError::BadStatus {
                        url,
                        status: response.status,
                    });
                }
                debug!(url = %url, bytes = response.body().len(), "Fetched static asset");
                Ok(CacheEntry::from_response(
                    CacheKey::for_request(&request),
                    &response,
                    now_millis(),
                ))
            }
        };
        retry_if(&self.config.install_retry, attempt, InstallError::is_retryable).await
    }
}
