use crate::error::{Result, ScanError};
use crate::record::CacheEntry;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Change-detection store: identifier -> last known fingerprint and record.
///
/// Implementations are shared between workers. `store` is last-write-wins;
/// callers serialize work on one identifier through [`KeyedLocks`].
///
/// Methods may block. The orchestrator calls them through
/// `tokio::task::spawn_blocking`, never directly from an async worker.
pub trait RecordCache: Send + Sync {
    fn lookup(&self, identifier: &str) -> Result<Option<CacheEntry>>;

    fn store(&self, entry: &CacheEntry) -> Result<()>;
}

/// Process-local cache, used in tests and for one-off runs.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordCache for MemoryCache {
    fn lookup(&self, identifier: &str) -> Result<Option<CacheEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| ScanError::CacheError(e.to_string()))?;
        Ok(entries.get(identifier).cloned())
    }

    fn store(&self, entry: &CacheEntry) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| ScanError::CacheError(e.to_string()))?;
        entries.insert(entry.identifier.clone(), entry.clone());
        Ok(())
    }
}

/// Lock table sharded by key hash. Two keys may share a shard; one key always
/// maps to the same shard, so holders of a key's guard exclude each other.
pub struct KeyedLocks {
    shards: Vec<Arc<AsyncMutex<()>>>,
}

impl KeyedLocks {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| Arc::new(AsyncMutex::new(())))
                .collect(),
        }
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.shards.len() as u64) as usize;
        self.shards[index].clone().lock_owned().await
    }
}
