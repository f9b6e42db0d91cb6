//! §4.2 Embedding Cache: four independent bounded LRU maps (passage
//! embeddings, query embeddings, H1-title embeddings, inferred document
//! contexts), keyed so they cannot collide, each with its own hit/miss/
//! eviction counters.

use crate::config::EmbeddingConfig;
use crate::models::{InferredContext, Vector};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CounterSet {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CounterSet {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

struct BoundedCache<V> {
    map: Mutex<LruCache<String, V>>,
    counters: CounterSet,
}

impl<V: Clone> BoundedCache<V> {
    fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity must be > 0");
        Self {
            map: Mutex::new(LruCache::new(cap)),
            counters: CounterSet::new(),
        }
    }

    fn get(&self, key: &str) -> Option<V> {
        let mut map = self.map.lock().expect("cache mutex poisoned");
        match map.get(key) {
            Some(v) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, key: String, value: V) {
        let mut map = self.map.lock().expect("cache mutex poisoned");
        if map.len() == map.cap().get() && !map.contains(&key) {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
        map.put(key, value);
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

/// Keys are prefixed per sub-cache so identical raw text cannot collide
/// across passage/query/H1/context caches.
pub struct CacheRegistry {
    passage: BoundedCache<Vector>,
    query: BoundedCache<Vector>,
    h1: BoundedCache<Vector>,
    context: BoundedCache<InferredContext>,
}

impl CacheRegistry {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            passage: BoundedCache::new(config.passage_cache_size),
            query: BoundedCache::new(config.query_cache_size),
            h1: BoundedCache::new(config.h1_cache_size),
            context: BoundedCache::new(config.context_cache_size),
        }
    }

    pub fn get_passage(&self, key: &str) -> Option<Vector> {
        self.passage.get(key)
    }
    pub fn put_passage(&self, key: String, v: Vector) {
        self.passage.put(key, v);
    }

    pub fn get_query(&self, key: &str) -> Option<Vector> {
        self.query.get(&format!("query:{key}"))
    }
    pub fn put_query(&self, key: &str, v: Vector) {
        self.query.put(format!("query:{key}"), v);
    }

    pub fn get_h1(&self, key: &str) -> Option<Vector> {
        self.h1.get(&format!("h1:{key}"))
    }
    pub fn put_h1(&self, key: &str, v: Vector) {
        self.h1.put(format!("h1:{key}"), v);
    }

    pub fn get_context(&self, doc_path: &str, title_hash: &str) -> Option<InferredContext> {
        self.context.get(&format!("ctx:{doc_path}#{title_hash}"))
    }
    pub fn put_context(&self, doc_path: &str, title_hash: &str, ctx: InferredContext) {
        self.context.put(format!("ctx:{doc_path}#{title_hash}"), ctx);
    }

    pub fn stats(&self) -> CacheRegistryStats {
        CacheRegistryStats {
            passage: self.passage.stats(),
            query: self.query.stats(),
            h1: self.h1.stats(),
            context: self.context.stats(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheRegistryStats {
    pub passage: CacheStats,
    pub query: CacheStats,
    pub h1: CacheStats,
    pub context: CacheStats,
}
