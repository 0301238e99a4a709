//! Snapshot cache keyed by subscription identity.
//!
//! Every push for a key replaces the cached NormalizedGraph for that key.
//! The cache is memory-resident and bounded: once `capacity` keys are held,
//! storing a new key evicts the least recently stored one.

use crate::normalized::NormalizedGraph;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use trellis_core::RawGraph;
use tracing::debug;

/// Default number of snapshots kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Composite identity of a subscription: directory, queried key and filter.
///
/// Two consumers with the same triple share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub directory_id: String,
    pub public_key: String,
    /// Ranking filter in percent, `0..=100`.
    pub ranking_filter: u8,
}

impl SubscriptionKey {
    pub fn new(
        directory_id: impl Into<String>,
        public_key: impl Into<String>,
        ranking_filter: u8,
    ) -> Self {
        Self {
            directory_id: directory_id.into(),
            public_key: public_key.into(),
            ranking_filter,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.directory_id, self.public_key, self.ranking_filter
        )
    }
}

/// Bounded cache of the latest NormalizedGraph per SubscriptionKey.
pub struct GraphCache {
    entries: Mutex<LruCache<SubscriptionKey, Arc<NormalizedGraph>>>,
}

impl Default for GraphCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl GraphCache {
    /// Creates a cache holding at most `capacity` snapshots (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Normalizes a snapshot and stores it, replacing any prior entry.
    pub fn put(&self, key: SubscriptionKey, raw: RawGraph) -> Arc<NormalizedGraph> {
        let normalized = Arc::new(NormalizedGraph::from_raw(raw));

        let displaced = self.entries.lock().push(key.clone(), normalized.clone());
        if let Some((old_key, _)) = displaced {
            if old_key != key {
                debug!("Evicted cached graph {}", old_key);
            }
        }

        normalized
    }

    /// Looks up the latest snapshot for a key.
    ///
    /// Lookups do not refresh recency; only `put` does.
    pub fn get(&self, key: &SubscriptionKey) -> Option<Arc<NormalizedGraph>> {
        self.entries.lock().peek(key).cloned()
    }

    /// Looks up by the parts of a SubscriptionKey.
    pub fn lookup(
        &self,
        directory_id: &str,
        public_key: &str,
        ranking_filter: u8,
    ) -> Option<Arc<NormalizedGraph>> {
        self.get(&SubscriptionKey::new(directory_id, public_key, ranking_filter))
    }

    /// Removes a snapshot.
    pub fn remove(&self, key: &SubscriptionKey) -> Option<Arc<NormalizedGraph>> {
        self.entries.lock().pop(key)
    }

    /// Drops every snapshot.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached snapshots.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of cached snapshots.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }
}
