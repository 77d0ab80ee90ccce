//! TTL-bounded stat cache for remote filesystems.
//!
//! Remote stats dominate WebDAV traffic: clients issue a PROPFIND before
//! almost every other operation. The cache memoizes `path -> StaticFileInfo`
//! for a short, construction-time TTL. There is no size cap; the working set
//! is one entry per recently-touched path.

use crate::metadata::StaticFileInfo;
use crate::path;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedStat {
    info: StaticFileInfo,
    expires: Instant,
}

/// Thread-safe `path -> StaticFileInfo` cache with TTL expiration.
///
/// Cloning is cheap and shares the underlying map.
#[derive(Clone)]
pub struct StatCache {
    entries: Arc<DashMap<String, CachedStat>>,
    ttl: Duration,
}

impl StatCache {
    /// Creates a cache whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Returns the cached info for `path` if present and not expired.
    pub fn get(&self, path: &str) -> Option<StaticFileInfo> {
        if let Some(entry) = self.entries.get(path) {
            if entry.expires > Instant::now() {
                return Some(entry.info.clone());
            }
            drop(entry);
            self.entries.remove(path);
        }
        None
    }

    /// Inserts or replaces the entry for `path`.
    pub fn insert(&self, path: &str, info: StaticFileInfo) {
        self.entries.insert(
            path.to_string(),
            CachedStat {
                info,
                expires: Instant::now() + self.ttl,
            },
        );
    }

    /// Removes the entry for `path`.
    pub fn invalidate(&self, path: &str) {
        self.entries.remove(path);
    }

    /// Removes the entry for `path` and for its parent directory.
    ///
    /// Mutations change the parent's listing metadata too, so both must be
    /// re-fetched on the next stat.
    pub fn invalidate_with_parent(&self, path: &str) {
        self.entries.remove(path);
        self.entries.remove(&path::parent(path));
    }

    /// Removes `path`, everything below it, and its parent.
    pub fn invalidate_tree(&self, path: &str) {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.entries
            .retain(|k, _| k != path && !k.starts_with(&prefix));
        self.entries.remove(&path::parent(path));
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live entries, counting expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The construction-time TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
