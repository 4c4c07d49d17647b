//! Fingerprint-keyed page cache with TTL, LRU budgets and single-flight fetches

use crate::fingerprint::prefix_for;
use crate::source::PageResult;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use grid_shared::{Fingerprint, GridError, GridResult, Row, ViewId};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Cached server page
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub rows: Vec<Row>,
    pub total_count: usize,
    pub fetched_at: DateTime<Utc>,
    pub etag: Option<String>,
    /// Row identity per position; `None` where the id function failed
    pub row_ids: Vec<Option<String>>,
    pub size_bytes: usize,
}

impl CacheEntry {
    pub fn from_page(page: PageResult, row_id: impl Fn(&Row) -> Option<String>) -> Self {
        let row_ids = page.items.iter().map(&row_id).collect();
        let size_bytes = estimate_size(&page.items);
        Self {
            rows: page.items,
            total_count: page.total_count,
            fetched_at: Utc::now(),
            etag: page.etag,
            row_ids,
            size_bytes,
        }
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.row_ids.iter().flatten().any(|row_id| row_id == id)
    }
}

/// Serialized length is a close enough proxy for heap usage
fn estimate_size(rows: &[Row]) -> usize {
    rows.iter()
        .map(|row| serde_json::to_vec(row).map(|v| v.len()).unwrap_or(0))
        .sum::<usize>()
        + std::mem::size_of::<CacheEntry>()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 200,
            max_bytes: 32 * 1024 * 1024, // 32MB
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub coalesced: u64,
    pub in_flight: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
}

struct Slot {
    entry: Arc<CacheEntry>,
    inserted_at: Instant,
}

struct Inner {
    entries: LruCache<Fingerprint, Slot>,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    coalesced: u64,
}

impl Inner {
    fn remove(&mut self, key: &Fingerprint) -> Option<Slot> {
        let slot = self.entries.pop(key)?;
        self.bytes = self.bytes.saturating_sub(slot.entry.size_bytes);
        Some(slot)
    }

    fn purge_expired(&mut self, ttl: Duration) {
        let expired: Vec<Fingerprint> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.inserted_at.elapsed() >= ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
            self.expirations += 1;
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, GridResult<Arc<CacheEntry>>>>;

/// Page cache owned by one grid controller
pub struct PageCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
    in_flight: Mutex<HashMap<Fingerprint, SharedFetch>>,
}

impl PageCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
                coalesced: 0,
            }),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Entry for `key`, or `None` when absent or past its TTL
    pub fn get(&self, key: &Fingerprint) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.peek(key) {
            Some(slot) => slot.inserted_at.elapsed() >= self.config.ttl,
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.entries.get(key).map(|slot| slot.entry.clone())
    }

    /// Look up without touching recency or counters
    pub fn peek(&self, key: &Fingerprint) -> Option<Arc<CacheEntry>> {
        let inner = self.inner.lock();
        inner
            .entries
            .peek(key)
            .filter(|slot| slot.inserted_at.elapsed() < self.config.ttl)
            .map(|slot| slot.entry.clone())
    }

    pub fn put(&self, key: Fingerprint, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        self.put_arc(key, entry.clone());
        entry
    }

    fn put_arc(&self, key: Fingerprint, entry: Arc<CacheEntry>) {
        let size = entry.size_bytes;
        let mut inner = self.inner.lock();
        inner.remove(&key);

        if size > self.config.max_bytes {
            log::warn!(
                "Page {key} is {size} bytes, over the {} byte budget; not caching",
                self.config.max_bytes
            );
            return;
        }

        // Expired entries go first, then least recently used
        inner.purge_expired(self.config.ttl);
        while !inner.entries.is_empty()
            && (inner.entries.len() + 1 > self.config.max_entries
                || inner.bytes + size > self.config.max_bytes)
        {
            if let Some((evicted, slot)) = inner.entries.pop_lru() {
                inner.bytes = inner.bytes.saturating_sub(slot.entry.size_bytes);
                inner.evictions += 1;
                log::debug!("Evicted {evicted} from page cache");
            }
        }

        inner.bytes += size;
        inner.entries.put(
            key,
            Slot {
                entry,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove every entry matching `predicate`; returns how many were removed
    pub fn invalidate(&self, predicate: impl Fn(&Fingerprint, &CacheEntry) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let matching: Vec<Fingerprint> = inner
            .entries
            .iter()
            .filter(|(key, slot)| predicate(key, &slot.entry))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            inner.remove(key);
        }
        matching.len()
    }

    pub fn invalidate_keys(&self, keys: &[Fingerprint]) -> usize {
        let mut inner = self.inner.lock();
        keys.iter().filter(|key| inner.remove(key).is_some()).count()
    }

    /// Remove entries holding any of the given row ids
    pub fn invalidate_rows(&self, ids: &[String]) -> usize {
        self.invalidate(|_, entry| ids.iter().any(|id| entry.contains_id(id)))
    }

    pub fn clear_view(&self, view: &ViewId) -> usize {
        let prefix = prefix_for(view);
        self.invalidate(|key, _| key.starts_with(&prefix))
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every row held by a live entry
    pub fn known_ids(&self) -> HashSet<String> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|(_, slot)| slot.inserted_at.elapsed() < self.config.ttl)
            .flat_map(|(_, slot)| slot.entry.row_ids.iter().flatten().cloned())
            .collect()
    }

    /// Return the cached entry or run `fetcher`, sharing one fetch among all
    /// concurrent callers for the same key. Failures reach every waiter and
    /// are never cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &Fingerprint, fetcher: F) -> GridResult<Arc<CacheEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GridResult<CacheEntry>> + Send + 'static,
    {
        if let Some(entry) = self.get(key) {
            return Ok(entry);
        }

        let (shared, leader) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(shared) => {
                    self.inner.lock().coalesced += 1;
                    (shared.clone(), false)
                }
                None => {
                    let fut: BoxFuture<'static, GridResult<Arc<CacheEntry>>> =
                        fetcher().map(|result| result.map(Arc::new)).boxed();
                    let shared = fut.shared();
                    in_flight.insert(key.clone(), shared.clone());
                    (shared, true)
                }
            }
        };

        if !leader {
            return shared.await;
        }

        let guard = InFlightGuard {
            cache: self,
            key: key.clone(),
        };
        let result = shared.await;
        drop(guard);

        match &result {
            Ok(entry) => self.put_arc(key.clone(), entry.clone()),
            Err(GridError::Cancelled) => log::debug!("Fetch for {key} cancelled; not cached"),
            Err(err) => log::debug!("Fetch for {key} failed; not cached: {err}"),
        }
        result
    }

    pub fn is_in_flight(&self, key: &Fingerprint) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        let in_flight = self.in_flight.lock().len();
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            coalesced: inner.coalesced,
            in_flight,
            max_entries: self.config.max_entries,
            max_bytes: self.config.max_bytes,
        }
    }
}

/// Clears the in-flight slot even when the leading caller is dropped mid-fetch
struct InFlightGuard<'a> {
    cache: &'a PageCache,
    key: Fingerprint,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.in_flight.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(s: &str) -> Fingerprint {
        Fingerprint::from_canonical(s.to_string())
    }

    fn entry(ids: &[&str]) -> CacheEntry {
        let rows = ids.iter().map(|id| json!({"id": id})).collect();
        CacheEntry::from_page(PageResult::new(rows, ids.len()), |row| {
            row["id"].as_str().map(String::from)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_get_within_ttl() {
        let cache = PageCache::new(CacheConfig::default());
        let stored = cache.put(key("grid:a|p=0:25"), entry(&["1", "2"]));
        let fetched = cache.get(&key("grid:a|p=0:25")).unwrap();
        assert_eq!(*fetched, *stored);

        assert_eq!(cache.invalidate_keys(&[key("grid:a|p=0:25")]), 1);
        assert!(cache.get(&key("grid:a|p=0:25")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = PageCache::new(CacheConfig {
            ttl: Duration::from_secs(10),
            ..CacheConfig::default()
        });
        cache.put(key("k"), entry(&["1"]));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get(&key("k")).is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key("k")).is_none());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_by_entry_budget() {
        let cache = PageCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        cache.put(key("a"), entry(&["1"]));
        cache.put(key("b"), entry(&["2"]));
        // Touch `a` so `b` becomes least recently used
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("c"), entry(&["3"]));

        assert!(cache.peek(&key("a")).is_some());
        assert!(cache.peek(&key("b")).is_none());
        assert!(cache.peek(&key("c")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_evicted_before_recent_ones() {
        let cache = PageCache::new(CacheConfig {
            ttl: Duration::from_secs(10),
            max_entries: 2,
            ..CacheConfig::default()
        });
        cache.put(key("old"), entry(&["1"]));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put(key("recent"), entry(&["2"]));
        // Make `recent` the LRU candidate
        assert!(cache.get(&key("old")).is_some());
        tokio::time::advance(Duration::from_secs(3)).await;

        cache.put(key("new"), entry(&["3"]));
        assert!(cache.peek(&key("recent")).is_some());
        assert!(cache.peek(&key("new")).is_some());
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_byte_budget() {
        let one = entry(&["1"]);
        let budget = one.size_bytes * 2;
        let cache = PageCache::new(CacheConfig {
            max_bytes: budget,
            ..CacheConfig::default()
        });
        cache.put(key("a"), entry(&["1"]));
        cache.put(key("b"), entry(&["2"]));
        cache.put(key("c"), entry(&["3"]));
        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert!(stats.bytes <= budget);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_rows_and_views() {
        let cache = PageCache::new(CacheConfig::default());
        let orders = ViewId::new("orders").unwrap();
        let p0 = key(&format!("{}p=0:25", prefix_for(&orders)));
        let p1 = key(&format!("{}p=1:25", prefix_for(&orders)));
        let other = key("grid:customers|p=0:25");
        cache.put(p0.clone(), entry(&["x", "y"]));
        cache.put(p1.clone(), entry(&["z"]));
        cache.put(other.clone(), entry(&["x"]));

        assert_eq!(cache.known_ids().len(), 3);
        assert_eq!(cache.invalidate_rows(&["z".to_string()]), 1);
        assert!(cache.peek(&p1).is_none());

        assert_eq!(cache.clear_view(&orders), 1);
        assert!(cache.peek(&p0).is_none());
        assert!(cache.peek(&other).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let cache = Arc::new(PageCache::new(CacheConfig::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&key("k"), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(entry(&["1", "2"]))
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(cache.peek(&key("k")).is_some());
        assert!(!cache.is_in_flight(&key("k")));
        assert_eq!(cache.stats().coalesced, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_not_cached_and_shared() {
        let cache = Arc::new(PageCache::new(CacheConfig::default()));

        let a = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key("k"), || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(GridError::NetworkUnavailable {
                            message: "offline".into(),
                        })
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        let b = cache
            .get_or_fetch(&key("k"), || async { Ok(entry(&["1"])) })
            .await;

        assert!(matches!(a.await.unwrap(), Err(GridError::NetworkUnavailable { .. })));
        assert!(matches!(b, Err(GridError::NetworkUnavailable { .. })));
        assert!(cache.peek(&key("k")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_leaves_cache_untouched() {
        let cache = PageCache::new(CacheConfig::default());
        let result = cache
            .get_or_fetch(&key("k"), || async { Err(GridError::Cancelled) })
            .await;
        assert_eq!(result.unwrap_err(), GridError::Cancelled);
        assert!(cache.is_empty());
    }
}
