//! Response cache
//!
//! Completed responses keyed by [`CacheKey`], with an independent
//! `{ttl, max_entries}` policy per [`Category`]. Expiry is lazy on
//! [`ResponseCache::get`] and proactive through [`ResponseCache::purge_expired`],
//! which a background sweeper calls periodically. When a category is full,
//! its single oldest entry is evicted; other categories are never touched.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::fingerprint::{CacheKey, Category};

/// Per-category cache policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl CachePolicy {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { ttl, max_entries }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 100)
    }
}

/// A cached response
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub response: Value,
    pub created_at: Instant,
    pub category: Category,
    pub version: u32,
}

/// Counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups served from cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Bucket {
    entries: HashMap<CacheKey, CacheEntry>,
    // insertion order, oldest first
    order: VecDeque<CacheKey>,
}

impl Bucket {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry)
    }

    fn pop_oldest(&mut self) -> Option<CacheEntry> {
        while let Some(key) = self.order.pop_front() {
            if let Some(entry) = self.entries.remove(&key) {
                return Some(entry);
            }
        }
        None
    }
}

#[derive(Default)]
struct CacheState {
    buckets: HashMap<Category, Bucket>,
    // key -> category, so a key moving categories is still unique
    index: HashMap<CacheKey, Category>,
}

impl CacheState {
    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let category = self.index.remove(key)?;
        self.buckets.get_mut(&category)?.remove(key)
    }
}

/// Category-partitioned response cache.
///
/// Shared behind an `Arc`; every operation takes the internal lock once.
pub struct ResponseCache {
    policies: HashMap<Category, CachePolicy>,
    default_policy: CachePolicy,
    version: AtomicU32,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    /// Create a cache; categories missing from `policies` use `default_policy`.
    pub fn new(policies: HashMap<Category, CachePolicy>, default_policy: CachePolicy) -> Self {
        Self {
            policies,
            default_policy,
            version: AtomicU32::new(1),
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Policy in effect for `category`
    pub fn policy(&self, category: Category) -> CachePolicy {
        self.policies
            .get(&category)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Current entry format version
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// Set the entry format version; entries of other versions read as expired.
    pub fn with_version(self, version: u32) -> Self {
        self.version.store(version, Ordering::SeqCst);
        self
    }

    /// Invalidate every existing entry by moving to a new format version.
    pub fn bump_version(&self) -> u32 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        entry.version != self.version()
            || now.saturating_duration_since(entry.created_at) > self.policy(entry.category).ttl
    }

    /// Look up `key`, evicting it if it has expired.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let found = state
            .index
            .get(key)
            .and_then(|category| state.buckets.get(category))
            .and_then(|bucket| bucket.entries.get(key))
            .map(|entry| (entry.clone(), self.is_expired(entry, now)));

        match found {
            Some((entry, false)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some((_, true)) => {
                state.remove(key);
                drop(state);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache entry expired on read");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `response` under `key` in `category`.
    ///
    /// Replaces any previous entry for the key. If the category is at
    /// capacity its oldest entry is evicted first.
    pub fn set(&self, key: CacheKey, response: Value, category: Category) {
        let policy = self.policy(category);
        let entry = CacheEntry {
            key: key.clone(),
            response,
            created_at: Instant::now(),
            category,
            version: self.version(),
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.remove(&key);

        let capacity = policy.max_entries.max(1);
        let bucket = state.buckets.entry(category).or_default();
        let mut evicted = 0u64;
        while bucket.entries.len() >= capacity {
            let Some(old) = bucket.pop_oldest() else {
                break;
            };
            debug!(key = %old.key, category = %category, "Evicting oldest cache entry");
            state.index.remove(&old.key);
            evicted += 1;
        }

        bucket.order.push_back(key.clone());
        bucket.entries.insert(key.clone(), entry);
        state.index.insert(key, category);
        drop(guard);

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Remove an entry regardless of age
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired: Vec<CacheKey> = state
            .buckets
            .values()
            .flat_map(|bucket| bucket.entries.values())
            .filter(|entry| self.is_expired(entry, now))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        drop(state);

        if !expired.is_empty() {
            self.evictions.fetch_add(expired.len() as u64, Ordering::Relaxed);
        }
        expired.len()
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries in one category
    pub fn len_category(&self, category: Category) -> usize {
        self.state
            .lock()
            .buckets
            .get(&category)
            .map_or(0, |bucket| bucket.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval`.
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    info!(purged, remaining = cache.len(), "Cache sweep removed expired entries");
                }
            }
        })
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(HashMap::new(), CachePolicy::default())
    }
}
