//! Read-through query cache for link lookups.
//!
//! Cache keys include the store's revision counter, so any write
//! implicitly invalidates every cached query for that project: stale
//! entries simply stop being asked for and age out via TTL. This trades
//! precision for simplicity; no per-reference invalidation bookkeeping.

use std::time::Duration;

use concord_engine::{AlignmentLink, ProjectId, Revision, Side};
use moka::sync::Cache;

use crate::config::SyncConfig;

/// Cache key for one query against one store revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub project_id: ProjectId,
    pub side: Side,
    /// Sanitized reference string (or prefix) the query asked for
    pub key: String,
    pub revision: Revision,
}

/// TTL-bounded cache of link query results.
pub struct QueryCache {
    inner: Cache<QueryKey, Vec<AlignmentLink>>,
}

impl QueryCache {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(config.cache_max_entries)
                .time_to_live(config.cache_ttl)
                .build(),
        }
    }

    pub fn with_ttl(ttl: Duration, max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<Vec<AlignmentLink>> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: QueryKey, links: Vec<AlignmentLink>) {
        self.inner.insert(key, links);
    }

    /// Fetch from cache or compute and store.
    pub fn get_or_compute(
        &self,
        key: QueryKey,
        compute: impl FnOnce() -> Vec<AlignmentLink>,
    ) -> Vec<AlignmentLink> {
        if let Some(hit) = self.inner.get(&key) {
            return hit;
        }
        let links = compute();
        self.inner.insert(key, links.clone());
        links
    }

    /// Drop everything, regardless of project or revision. Used when a
    /// download replaces a store wholesale.
    pub fn reset(&self) {
        self.inner.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}
