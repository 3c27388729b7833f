//! Age-based expiry of dynamic entries.

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use quizcache_common::now_millis;

use crate::config::{ExpiryConfig, VersionDescriptor};
use crate::store::CacheStore;

/// Drop entries in `version`'s dynamic generation older than the configured
/// max age, measured from `now_ms`. Static generations are never touched.
pub async fn purge_expired(
    store: &CacheStore,
    version: &VersionDescriptor,
    expiry: &ExpiryConfig,
    now_ms: u64,
) -> usize {
    let max_age_ms = u64::try_from(expiry.max_age().as_millis()).unwrap_or(u64::MAX);
    let cutoff = now_ms.saturating_sub(max_age_ms);
    let generation = version.dynamic_name();
    let purged = store.purge_older_than(&generation, cutoff).await;
    if purged > 0 {
        info!(generation = %generation, purged, "Expired dynamic entries");
    }
    purged
}

/// Background task running [`purge_expired`] every sweep interval for one
/// version. The task stops when the `Sweeper` is dropped.
#[derive(Debug)]
pub struct Sweeper {
    version: VersionDescriptor,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Start sweeping `version`'s dynamic generation. The first sweep runs
    /// immediately.
    pub fn spawn(store: CacheStore, version: VersionDescriptor, expiry: ExpiryConfig) -> Self {
        let swept = version.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(expiry.sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(version = %swept, every = ?expiry.sweep_interval(), "Expiry sweeper started");
            loop {
                ticker.tick().await;
                purge_expired(&store, &swept, &expiry, now_millis()).await;
            }
        });
        Self { version, handle }
    }

    pub fn version(&self) -> &VersionDescriptor {
        &self.version
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        debug!(version = %self.version, "Expiry sweeper stopped");
        self.handle.abort();
    }
}
