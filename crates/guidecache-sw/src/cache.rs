//! Cache store: named partitions of captured responses.
//!
//! Entries never expire; a partition disappears only when it is deleted as
//! a whole, which the lifecycle controller does for stale generations.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::fetch::FetchResponse;
use crate::{Result, ServiceWorkerError};

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL (cache key).
    pub url: String,

    /// Request method; always `GET`.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,

    /// Insertion order within the partition.
    pub seq: u64,
}

impl CacheEntry {
    fn capture(url: &str, response: &FetchResponse, seq: u64) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: guidecache_common::unix_millis(),
            seq,
        }
    }

    /// Response served from this entry.
    pub fn to_response(&self) -> FetchResponse {
        FetchResponse {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            from_cache: true,
        }
    }
}

// ==================== Cache ====================

/// A cache partition.
#[derive(Debug)]
pub struct Cache {
    /// Partition name.
    pub name: String,

    /// Creation order across the storage.
    id: u64,

    entries: HashMap<String, CacheEntry>,

    next_seq: u64,
}

impl Cache {
    fn new(name: &str, id: u64) -> Self {
        Self {
            name: name.to_string(),
            id,
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Match a request.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Store a response, replacing any entry for the same key.
    pub fn put(&mut self, url: &str, response: &FetchResponse) {
        self.next_seq += 1;
        let entry = CacheEntry::capture(url, response, self.next_seq);
        self.entries.insert(url.to_string(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<&str> {
        let mut entries: Vec<&CacheEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.url.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Cache storage: every partition, of every generation.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    next_id: u64,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let next_id = &mut self.next_id;
        self.caches.entry(name.to_string()).or_insert_with(|| {
            *next_id += 1;
            Cache::new(name, *next_id)
        })
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Cache names in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.ordered().into_iter().map(|c| c.name.as_str()).collect()
    }

    /// Match across all caches, oldest partition first.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.ordered()
            .into_iter()
            .find_map(|cache| cache.match_request(url))
    }

    fn ordered(&self) -> Vec<&Cache> {
        let mut caches: Vec<&Cache> = self.caches.values().collect();
        caches.sort_by_key(|c| c.id);
        caches
    }
}

// ==================== Cache Store ====================

/// Shared handle to the cache storage.
///
/// Cloning is cheap; every clone sees the same partitions. Writes are
/// last-write-wins per key.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    inner: Arc<RwLock<CacheStorage>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a partition, creating it if needed.
    pub async fn open(&self, name: &str) -> CacheHandle {
        let id = self.inner.write().await.open(name).id;
        trace!(partition = %name, "Opened partition");
        CacheHandle {
            name: name.to_string(),
            id,
            store: self.clone(),
        }
    }

    /// Store a response in a partition, creating the partition if needed.
    pub async fn put(&self, partition: &str, key: &str, response: &FetchResponse) {
        self.inner.write().await.open(partition).put(key, response);
        trace!(partition = %partition, key = %key, "Stored entry");
    }

    /// Look `key` up in one partition only.
    pub async fn match_in(&self, partition: &str, key: &str) -> Option<FetchResponse> {
        let storage = self.inner.read().await;
        storage
            .get(partition)
            .and_then(|cache| cache.match_request(key))
            .map(CacheEntry::to_response)
    }

    /// Look `key` up in every partition, oldest first.
    pub async fn match_any(&self, key: &str) -> Option<FetchResponse> {
        self.inner
            .read()
            .await
            .match_request(key)
            .map(CacheEntry::to_response)
    }

    /// Delete a partition with all its entries.
    pub async fn delete(&self, partition: &str) -> bool {
        let deleted = self.inner.write().await.delete(partition);
        if deleted {
            debug!(partition = %partition, "Deleted partition");
        }
        deleted
    }

    pub async fn has(&self, partition: &str) -> bool {
        self.inner.read().await.has(partition)
    }

    /// Partition names in creation order.
    pub async fn partitions(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .keys()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Keys of one partition in insertion order; empty if it does not exist.
    pub async fn keys(&self, partition: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .get(partition)
            .map(|c| c.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Partition name to keys, sorted by name. Used for diagnostics.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        let storage = self.inner.read().await;
        storage
            .ordered()
            .into_iter()
            .map(|cache| {
                let keys = cache.keys().into_iter().map(str::to_string).collect();
                (cache.name.clone(), keys)
            })
            .collect()
    }
}

// ==================== Cache Handle ====================

/// An opened partition.
///
/// Writes through a handle whose partition has since been deleted are
/// dropped, so a superseded generation finishing its install late cannot
/// resurrect a pruned partition.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    name: String,
    id: u64,
    store: CacheStore,
}

impl CacheHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store a response. Fails with `CacheError` if the partition has been
    /// deleted since it was opened; nothing is written then.
    pub async fn put(&self, key: &str, response: &FetchResponse) -> Result<()> {
        let mut storage = self.store.inner.write().await;
        match storage.caches.get_mut(&self.name) {
            Some(cache) if cache.id == self.id => {
                cache.put(key, response);
                Ok(())
            }
            _ => {
                debug!(partition = %self.name, key = %key, "Partition deleted, write dropped");
                Err(ServiceWorkerError::CacheError(format!(
                    "partition {} was deleted",
                    self.name
                )))
            }
        }
    }

    /// Match a request in this partition.
    pub async fn match_request(&self, key: &str) -> Option<FetchResponse> {
        let storage = self.store.inner.read().await;
        storage
            .caches
            .get(&self.name)
            .filter(|cache| cache.id == self.id)
            .and_then(|cache| cache.match_request(key))
            .map(CacheEntry::to_response)
    }

    /// Keys in insertion order.
    pub async fn keys(&self) -> Vec<String> {
        let storage = self.store.inner.read().await;
        storage
            .caches
            .get(&self.name)
            .filter(|cache| cache.id == self.id)
            .map(|c| c.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("v1", 1);
        cache.put("https://example.com/style.css", &FetchResponse::ok("body{}"));

        let entry = cache.match_request("https://example.com/style.css").unwrap();
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.body, b"body{}");
        assert!(cache.match_request("https://example.com/other.css").is_none());
    }

    #[test]
    fn test_cache_put_overwrites() {
        let mut cache = Cache::new("v1", 1);
        cache.put("https://example.com/a.json", &FetchResponse::ok("old"));
        cache.put("https://example.com/a.json", &FetchResponse::ok("new"));

        assert_eq!(cache.len(), 1);
        let entry = cache.match_request("https://example.com/a.json").unwrap();
        assert_eq!(entry.body, b"new");
    }

    #[test]
    fn test_cache_keys_in_insertion_order() {
        let mut cache = Cache::new("test", 1);
        cache.put("https://example.com/b.js", &FetchResponse::ok(""));
        cache.put("https://example.com/a.js", &FetchResponse::ok(""));
        cache.put("https://example.com/c.js", &FetchResponse::ok(""));

        assert_eq!(
            cache.keys(),
            vec![
                "https://example.com/b.js",
                "https://example.com/a.js",
                "https://example.com/c.js"
            ]
        );
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1", 1);
        cache.put("https://example.com/style.css", &FetchResponse::ok(""));
        assert!(cache.delete("https://example.com/style.css"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1");
        assert!(storage.has("v1"));

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_storage_match_oldest_partition_first() {
        let mut storage = CacheStorage::new();
        storage.open("app-static-v1").put("k", &FetchResponse::ok("first"));
        storage.open("app-api-v1").put("k", &FetchResponse::ok("second"));

        assert_eq!(storage.keys(), vec!["app-static-v1", "app-api-v1"]);
        assert_eq!(storage.match_request("k").unwrap().body, b"first");
    }

    #[tokio::test]
    async fn test_store_match_scoped_to_partition() {
        let store = CacheStore::new();
        store
            .put("app-api-v1", "https://example.com/data/events.json", &FetchResponse::json("[]"))
            .await;

        assert!(store
            .match_in("app-static-v1", "https://example.com/data/events.json")
            .await
            .is_none());

        let hit = store
            .match_any("https://example.com/data/events.json")
            .await
            .unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.body, b"[]");
    }

    #[tokio::test]
    async fn test_handle_write_after_delete_fails() {
        let store = CacheStore::new();
        let handle = store.open("app-static-old").await;
        handle
            .put("https://example.com/", &FetchResponse::ok("a"))
            .await
            .unwrap();

        store.delete("app-static-old").await;
        let err = handle
            .put("https://example.com/", &FetchResponse::ok("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceWorkerError::CacheError(_)));
        assert!(!store.has("app-static-old").await);

        // Re-opening by name gives a fresh partition, not the stale handle.
        let reopened = store.open("app-static-old").await;
        assert!(reopened.keys().await.is_empty());
        assert!(handle.match_request("https://example.com/").await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot() {
        let store = CacheStore::new();
        store.put("b", "k2", &FetchResponse::ok("")).await;
        store.put("a", "k1", &FetchResponse::ok("")).await;

        let snapshot = store.snapshot().await;
        let names: Vec<&String> = snapshot.keys().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(store.partitions().await, vec!["b", "a"]);
    }
}
