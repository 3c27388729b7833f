//! Cache Store: versioned generations of captured responses.
//!
//! ```text
//! CacheStore (shared async handle)
//!     └── CacheStorage
//!             ├── static-v2   ── CacheKey → CacheEntry
//!             ├── dynamic-v2  ── CacheKey → CacheEntry
//!             └── static-v1   (stale until reaped)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderName, HeaderValue, Method, StatusCode};
use quizcache_common::QuizCacheError;
use quizcache_net::{Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

// ==================== Errors ====================

/// Errors from cache store operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Quota exceeded writing to {generation}: need {requested} bytes, {available} available")]
    QuotaExceeded {
        generation: String,
        requested: u64,
        available: u64,
    },

    #[error("Snapshot I/O failed for {path}: {source}")]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported snapshot format {0}")]
    SnapshotVersion(u32),

    #[error("Snapshot is malformed: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
}

impl From<CacheError> for QuizCacheError {
    fn from(err: CacheError) -> Self {
        QuizCacheError::cache_with_source("cache store operation failed", err)
    }
}

// ==================== Keys & Entries ====================

/// Normalized request identity: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    /// Key for a method and URL.
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Key identifying a request.
    pub fn for_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An immutable captured response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub response_type: String,
    #[serde(with = "body_base64")]
    pub body: Bytes,
    /// Milliseconds since the Unix epoch.
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture a response under `key`.
    pub fn from_response(key: CacheKey, response: &Response, cached_at: u64) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            key,
            status: response.status.as_u16(),
            headers,
            response_type: response.response_type.as_str().to_string(),
            body: response.body().clone(),
            cached_at,
        }
    }

    /// Rebuild a response from the captured snapshot.
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let response_type = ResponseType::parse(&self.response_type).unwrap_or_default();
        let mut response = Response::new(status, self.body.clone()).with_type(response_type);
        if let Ok(url) = Url::parse(&self.key.url) {
            response = response.with_url(url);
        }
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers.append(name, value);
            }
        }
        response
    }

    /// Bytes this entry counts against the quota.
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

// ==================== Generation ====================

/// A named partition of the store.
#[derive(Debug, Default)]
pub struct Generation {
    name: String,
    entries: HashMap<CacheKey, CacheEntry>,
}

impl Generation {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry.
    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// All keys, sorted for stable output.
    pub fn keys(&self) -> Vec<&CacheKey> {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        keys
    }

    fn bytes(&self) -> u64 {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

// ==================== Cache Storage ====================

/// All generations, with creation order and quota accounting.
#[derive(Debug, Default)]
pub struct CacheStorage {
    generations: HashMap<String, Generation>,
    order: Vec<String>,
    max_bytes: Option<u64>,
    used_bytes: u64,
}

impl CacheStorage {
    /// Create unbounded storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage limited to `max_bytes` of bodies.
    pub fn with_quota(max_bytes: Option<u64>) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    /// Open a generation, creating it if missing.
    pub fn open(&mut self, name: &str) -> &Generation {
        self.open_mut(name)
    }

    fn open_mut(&mut self, name: &str) -> &mut Generation {
        if !self.generations.contains_key(name) {
            debug!(generation = name, "Creating cache generation");
            self.order.push(name.to_string());
        }
        self.generations
            .entry(name.to_string())
            .or_insert_with(|| Generation::new(name))
    }

    /// Check if a generation exists.
    pub fn has(&self, name: &str) -> bool {
        self.generations.contains_key(name)
    }

    /// Borrow a generation.
    pub fn get(&self, name: &str) -> Option<&Generation> {
        self.generations.get(name)
    }

    /// Delete a generation and all its entries.
    pub fn delete(&mut self, name: &str) -> bool {
        match self.generations.remove(name) {
            Some(generation) => {
                self.used_bytes = self.used_bytes.saturating_sub(generation.bytes());
                self.order.retain(|n| n != name);
                true
            }
            None => false,
        }
    }

    /// Generation names in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Total body bytes stored.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    fn check_quota(&self, generation: &str, delta: i64) -> Result<(), CacheError> {
        let Some(max) = self.max_bytes else {
            return Ok(());
        };
        let projected = self.used_bytes as i64 + delta;
        if projected > max as i64 {
            return Err(CacheError::QuotaExceeded {
                generation: generation.to_string(),
                requested: delta.max(0) as u64,
                available: max.saturating_sub(self.used_bytes),
            });
        }
        Ok(())
    }

    /// Store one entry, replacing any entry with the same key.
    pub fn put(&mut self, generation: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.put_all(generation, vec![entry])
    }

    /// Store a batch atomically: either every entry lands or none does, and a
    /// rejected batch never creates the generation.
    pub fn put_all(&mut self, generation: &str, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        let mut incoming: HashMap<&CacheKey, u64> = HashMap::new();
        for entry in &entries {
            incoming.insert(&entry.key, entry.size());
        }
        let replaced: u64 = self
            .generations
            .get(generation)
            .map(|g| {
                incoming
                    .keys()
                    .filter_map(|key| g.get(key))
                    .map(CacheEntry::size)
                    .sum()
            })
            .unwrap_or(0);
        let added: u64 = incoming.values().sum();
        self.check_quota(generation, added as i64 - replaced as i64)?;
        drop(incoming);

        let target = self.open_mut(generation);
        for entry in entries {
            trace!(generation, key = %entry.key, bytes = entry.size(), "Cache put");
            target.entries.insert(entry.key.clone(), entry);
        }
        self.used_bytes = self.used_bytes + added - replaced;
        Ok(())
    }

    /// Remove one entry.
    pub fn delete_entry(&mut self, generation: &str, key: &CacheKey) -> bool {
        let Some(target) = self.generations.get_mut(generation) else {
            return false;
        };
        match target.entries.remove(key) {
            Some(entry) => {
                self.used_bytes = self.used_bytes.saturating_sub(entry.size());
                true
            }
            None => false,
        }
    }

    /// Look up within one generation.
    pub fn match_in(&self, generation: &str, key: &CacheKey) -> Option<&CacheEntry> {
        self.generations.get(generation)?.get(key)
    }

    /// Look up across generations.
    ///
    /// `preferred` generations are searched first, in the given order, then
    /// every other generation in creation order. The first hit wins.
    pub fn match_ordered(&self, key: &CacheKey, preferred: &[&str]) -> Option<(&str, &CacheEntry)> {
        let rest = self.order.iter().map(String::as_str).filter(|n| !preferred.contains(n));
        preferred.iter().copied().chain(rest).find_map(|name| {
            let generation = self.generations.get(name)?;
            generation.get(key).map(|entry| (generation.name(), entry))
        })
    }

    /// Drop entries in `generation` cached before `cutoff_ms`.
    pub fn purge_older_than(&mut self, generation: &str, cutoff_ms: u64) -> usize {
        let Some(target) = self.generations.get_mut(generation) else {
            return 0;
        };
        let stale: Vec<CacheKey> = target
            .entries
            .values()
            .filter(|e| e.cached_at < cutoff_ms)
            .map(|e| e.key.clone())
            .collect();
        let mut freed = 0;
        for key in &stale {
            if let Some(entry) = target.entries.remove(key) {
                freed += entry.size();
            }
        }
        self.used_bytes = self.used_bytes.saturating_sub(freed);
        stale.len()
    }

    /// Serialize every generation, in creation order.
    pub fn to_snapshot(&self) -> Result<Vec<u8>, CacheError> {
        let generations = self
            .order
            .iter()
            .filter_map(|name| self.generations.get(name))
            .map(|g| {
                let mut entries: Vec<CacheEntry> = g.entries.values().cloned().collect();
                entries.sort_by(|a, b| a.key.cmp(&b.key));
                SnapshotGeneration {
                    name: g.name.clone(),
                    entries,
                }
            })
            .collect();
        Ok(serde_json::to_vec_pretty(&Snapshot {
            format: SNAPSHOT_FORMAT,
            generations,
        })?)
    }

    /// Rebuild storage from [`CacheStorage::to_snapshot`] output.
    ///
    /// The quota is not enforced while restoring.
    pub fn from_snapshot(bytes: &[u8], max_bytes: Option<u64>) -> Result<Self, CacheError> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(CacheError::SnapshotVersion(snapshot.format));
        }
        let mut storage = Self::with_quota(None);
        for generation in snapshot.generations {
            storage.open(&generation.name);
            if !generation.entries.is_empty() {
                storage.put_all(&generation.name, generation.entries)?;
            }
        }
        storage.max_bytes = max_bytes;
        Ok(storage)
    }
}

const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format: u32,
    generations: Vec<SnapshotGeneration>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotGeneration {
    name: String,
    entries: Vec<CacheEntry>,
}

mod body_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// ==================== Cache Store ====================

/// Shared async handle to the process-wide [`CacheStorage`].
///
/// Clones share the same storage. Every operation takes the lock only for
/// the duration of the in-memory mutation.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    inner: Arc<RwLock<CacheStorage>>,
}

impl CacheStore {
    /// Wrap existing storage.
    pub fn new(storage: CacheStorage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(storage)),
        }
    }

    /// Empty storage with an optional byte quota.
    pub fn with_quota(max_bytes: Option<u64>) -> Self {
        Self::new(CacheStorage::with_quota(max_bytes))
    }

    /// Open (or create) a generation.
    pub async fn open(&self, generation: &str) {
        self.inner.write().await.open(generation);
    }

    /// Store one response copy.
    pub async fn put(&self, generation: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.inner.write().await.put(generation, entry)
    }

    /// Store a batch atomically.
    pub async fn put_all(&self, generation: &str, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        self.inner.write().await.put_all(generation, entries)
    }

    /// Ordered lookup across generations, see [`CacheStorage::match_ordered`].
    pub async fn match_ordered(&self, key: &CacheKey, preferred: &[&str]) -> Option<(String, CacheEntry)> {
        self.inner
            .read()
            .await
            .match_ordered(key, preferred)
            .map(|(name, entry)| (name.to_string(), entry.clone()))
    }

    /// Lookup within one generation.
    pub async fn match_in(&self, generation: &str, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.read().await.match_in(generation, key).cloned()
    }

    /// Delete a whole generation.
    pub async fn delete(&self, generation: &str) -> bool {
        self.inner.write().await.delete(generation)
    }

    /// Remove one entry.
    pub async fn delete_entry(&self, generation: &str, key: &CacheKey) -> bool {
        self.inner.write().await.delete_entry(generation, key)
    }

    /// Generation names in creation order.
    pub async fn list_generation_names(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Whether a generation exists.
    pub async fn has(&self, generation: &str) -> bool {
        self.inner.read().await.has(generation)
    }

    /// Entries in a generation; zero if it does not exist.
    pub async fn entry_count(&self, generation: &str) -> usize {
        self.inner
            .read()
            .await
            .get(generation)
            .map(Generation::len)
            .unwrap_or(0)
    }

    /// Keys in a generation, sorted.
    pub async fn keys(&self, generation: &str) -> Vec<CacheKey> {
        self.inner
            .read()
            .await
            .get(generation)
            .map(|g| g.keys().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total body bytes stored.
    pub async fn used_bytes(&self) -> u64 {
        self.inner.read().await.used_bytes()
    }

    /// Drop entries in `generation` cached before `cutoff_ms`.
    pub async fn purge_older_than(&self, generation: &str, cutoff_ms: u64) -> usize {
        self.inner.write().await.purge_older_than(generation, cutoff_ms)
    }

    /// Write a JSON snapshot, replacing the file atomically.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), CacheError> {
        let bytes = self.inner.read().await.to_snapshot()?;
        let io_err = |source| CacheError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Cache snapshot saved");
        Ok(())
    }

    /// Load a snapshot written by [`CacheStore::save_snapshot`].
    pub async fn load_snapshot(path: &Path, max_bytes: Option<u64>) -> Result<Self, CacheError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| CacheError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        })?;
        let storage = CacheStorage::from_snapshot(&bytes, max_bytes)?;
        debug!(
            path = %path.display(),
            generations = storage.keys().len(),
            "Cache snapshot loaded"
        );
        Ok(Self::new(storage))
    }
}
