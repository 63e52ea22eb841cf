//! Per-drive metadata cache.
//!
//! Backends that pay a network round-trip per lookup (WebDAV) keep entries
//! and directory listings here for a TTL. Records are serialized
//! [`EntryRecord`]s, so nothing live (connections, weak drive handles) is
//! stored; a backend-supplied [`EntryFactory`] rebuilds entries on read.
//!
//! A drive configured without a TTL gets a [`DisabledCache`], which never
//! stores anything.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::drive::{DriveResult, Entry, EntryRecord};
use crate::path::is_descendant;

/// Default number of records above which expired ones are swept.
pub const DEFAULT_CLEANUP_THRESHOLD: usize = 10_000;

/// Rebuilds a lightweight entry from a cached record.
pub type EntryFactory = Arc<dyn Fn(EntryRecord) -> DriveResult<Arc<dyn Entry>> + Send + Sync>;

/// Entry and listing cache keyed by drive path.
pub trait DriveCache: Send + Sync {
    fn get_entry(&self, path: &str) -> Option<Arc<dyn Entry>>;

    fn put_entry(&self, entry: &dyn Entry, ttl: Duration);

    /// Cached direct children of `path`. Misses if the listing or any of
    /// its entries has expired.
    fn get_children(&self, path: &str) -> Option<Vec<Arc<dyn Entry>>>;

    /// Cache a listing. Each child is also cached as an entry.
    fn put_children(&self, path: &str, entries: &[Arc<dyn Entry>], ttl: Duration);

    /// Drop the records at `path`; with `descendants`, also every record
    /// strictly under it.
    fn evict(&self, path: &str, descendants: bool);
}

/// Build the cache for a drive. `None` or a zero TTL disables caching.
pub fn new_drive_cache(ttl: Option<Duration>, factory: EntryFactory) -> Arc<dyn DriveCache> {
    match ttl {
        Some(ttl) if !ttl.is_zero() => Arc::new(TtlDriveCache::new(factory)),
        _ => Arc::new(DisabledCache),
    }
}

#[derive(Debug, Clone)]
struct Cached<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Cached<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// `DashMap`-backed TTL cache.
///
/// Expired records are removed when touched; a full sweep runs whenever the
/// record count crosses the cleanup threshold.
pub struct TtlDriveCache {
    entries: DashMap<String, Cached<String>>,
    children: DashMap<String, Cached<Vec<String>>>,
    factory: EntryFactory,
    cleanup_threshold: usize,
}

impl std::fmt::Debug for TtlDriveCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlDriveCache")
            .field("entries", &self.entries.len())
            .field("children", &self.children.len())
            .field("cleanup_threshold", &self.cleanup_threshold)
            .finish()
    }
}

impl TtlDriveCache {
    pub fn new(factory: EntryFactory) -> Self {
        Self::with_cleanup_threshold(factory, DEFAULT_CLEANUP_THRESHOLD)
    }

    pub fn with_cleanup_threshold(factory: EntryFactory, cleanup_threshold: usize) -> Self {
        Self {
            entries: DashMap::new(),
            children: DashMap::new(),
            factory,
            cleanup_threshold,
        }
    }

    /// Number of live records (entries plus listings).
    pub fn len(&self) -> usize {
        let entries = self.entries.iter().filter(|r| !r.is_expired()).count();
        let children = self.children.iter().filter(|r| !r.is_expired()).count();
        entries + children
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired record.
    pub fn cleanup_expired(&self) {
        self.entries.retain(|_, v| !v.is_expired());
        self.children.retain(|_, v| !v.is_expired());
    }

    fn maybe_cleanup(&self) {
        if self.entries.len() + self.children.len() > self.cleanup_threshold {
            self.cleanup_expired();
        }
    }

    fn store_entry(&self, entry: &dyn Entry, ttl: Duration) {
        let record = EntryRecord::of(entry);
        match serde_json::to_string(&record) {
            Ok(json) => {
                self.entries.insert(record.path, Cached::new(json, ttl));
            }
            Err(e) => {
                tracing::warn!(path = %record.path, error = %e, "failed to encode cache record")
            }
        }
    }

    fn load_entry(&self, path: &str) -> Option<Arc<dyn Entry>> {
        let json = {
            let cached = self.entries.get(path)?;
            if cached.is_expired() {
                drop(cached);
                self.entries.remove(path);
                return None;
            }
            cached.value.clone()
        };

        let decoded = serde_json::from_str::<EntryRecord>(&json)
            .map_err(|e| e.to_string())
            .and_then(|record| (self.factory)(record).map_err(|e| e.to_string()));
        match decoded {
            Ok(entry) => Some(entry),
            Err(error) => {
                tracing::warn!(path, %error, "dropping undecodable cache record");
                self.entries.remove(path);
                None
            }
        }
    }
}

impl DriveCache for TtlDriveCache {
    fn get_entry(&self, path: &str) -> Option<Arc<dyn Entry>> {
        self.load_entry(path)
    }

    fn put_entry(&self, entry: &dyn Entry, ttl: Duration) {
        self.store_entry(entry, ttl);
        self.maybe_cleanup();
    }

    fn get_children(&self, path: &str) -> Option<Vec<Arc<dyn Entry>>> {
        let paths = {
            let cached = self.children.get(path)?;
            if cached.is_expired() {
                drop(cached);
                self.children.remove(path);
                return None;
            }
            cached.value.clone()
        };

        let mut entries = Vec::with_capacity(paths.len());
        for child in &paths {
            match self.load_entry(child) {
                Some(entry) => entries.push(entry),
                None => {
                    self.children.remove(path);
                    return None;
                }
            }
        }
        Some(entries)
    }

    fn put_children(&self, path: &str, entries: &[Arc<dyn Entry>], ttl: Duration) {
        let mut paths = Vec::with_capacity(entries.len());
        for entry in entries {
            self.store_entry(entry.as_ref(), ttl);
            paths.push(entry.path().to_string());
        }
        self.children.insert(path.to_string(), Cached::new(paths, ttl));
        self.maybe_cleanup();
    }

    fn evict(&self, path: &str, descendants: bool) {
        self.entries.remove(path);
        self.children.remove(path);
        if descendants {
            self.entries.retain(|k, _| !is_descendant(k, path));
            self.children.retain(|k, _| !is_descendant(k, path));
        }
    }
}

/// Cache that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCache;

impl DriveCache for DisabledCache {
    fn get_entry(&self, _path: &str) -> Option<Arc<dyn Entry>> {
        None
    }

    fn put_entry(&self, _entry: &dyn Entry, _ttl: Duration) {}

    fn get_children(&self, _path: &str) -> Option<Vec<Arc<dyn Entry>>> {
        None
    }

    fn put_children(&self, _path: &str, _entries: &[Arc<dyn Entry>], _ttl: Duration) {}

    fn evict(&self, _path: &str, _descendants: bool) {}
}
