//! Generation Reaper: deletes stale generations on activation.

use tracing::{debug, info};

use crate::clients::SharedClients;
use crate::config::VersionDescriptor;
use crate::store::CacheStore;

/// What one activation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Generations deleted, in creation order.
    pub deleted: Vec<String>,
    /// Clients whose controller changed.
    pub claimed: usize,
}

pub struct GenerationReaper {
    version: VersionDescriptor,
    store: CacheStore,
    clients: SharedClients,
}

impl GenerationReaper {
    pub fn new(version: VersionDescriptor, store: CacheStore, clients: SharedClients) -> Self {
        Self {
            version,
            store,
            clients,
        }
    }

    /// Delete every generation this version does not own, open its dynamic
    /// generation, then claim all clients. Running it again deletes nothing.
    pub async fn activate(&self) -> ReapReport {
        let mut deleted = Vec::new();
        for name in self.store.list_generation_names().await {
            if self.version.owns(&name) {
                continue;
            }
            if self.store.delete(&name).await {
                debug!(generation = %name, "Deleted stale generation");
                deleted.push(name);
            }
        }
        self.store.open(&self.version.dynamic_name()).await;

        let claimed = self.clients.write().await.claim(&self.version);
        info!(
            version = %self.version,
            deleted = deleted.len(),
            claimed,
            "Activated"
        );
        ReapReport { deleted, claimed }
    }
}
