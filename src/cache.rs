//! Response Cache (C7): in-process LRU with per-entry TTL, keyed by the
//! fingerprint produced in `query.rs` (spec.md §4.7). A single `Mutex`
//! guards the map — no I/O is ever performed while it's held, matching the
//! lock-discipline rule in spec.md §5.

use crate::models::SearchResult;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: SearchResult,
    created_at: Instant,
    last_access: Instant,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, Entry>>,
    max_size: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), max_size, ttl }
    }

    /// Returns the cached value only if not expired, bumping `last_access`.
    pub fn get(&self, key: &str) -> Option<SearchResult> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let expired = entries.get(key).map(|e| now.duration_since(e.created_at) >= self.ttl).unwrap_or(true);
        if expired {
            entries.remove(key);
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.value.clone())
    }

    /// Inserts `value`, evicting the LRU entry first if at capacity.
    pub fn put(&self, key: String, value: SearchResult) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            if let Some(lru_key) = entries.iter().min_by_key(|(_, e)| e.last_access).map(|(k, _)| k.clone()) {
                entries.remove(&lru_key);
            }
        }

        entries.insert(key, Entry { value, created_at: now, last_access: now });
    }

    /// Removes every key matching `pattern`.
    pub fn invalidate(&self, pattern: &Regex) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|k, _| !pattern.is_match(k));
    }

    /// Drops expired entries; intended to run on a periodic background tick.
    pub fn sweep_expired(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let ttl = self.ttl;
        entries.retain(|_, e| now.duration_since(e.created_at) < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Aggregations, ResultMetadata};

    fn dummy_result() -> SearchResult {
        SearchResult {
            notes: vec![],
            users: vec![],
            hashtags: vec![],
            suggestions: vec![],
            mixed: vec![],
            aggregations: Aggregations::default(),
            metadata: ResultMetadata {
                query_id: "q".to_string(),
                took_ms: 1,
                served_from_cache: false,
                total: 0,
                max_score: 0.0,
                applied_corrections: vec![],
                rewritten_query: None,
            },
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.put("k1".to_string(), dummy_result());
        assert!(cache.get("k1").is_some());
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = ResponseCache::new(10, Duration::from_millis(1));
        cache.put("k1".to_string(), dummy_result());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k1").is_none());
    }

    #[test]
    fn evicts_lru_when_full() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.put("a".to_string(), dummy_result());
        cache.put("b".to_string(), dummy_result());
        cache.get("a");
        cache.put("c".to_string(), dummy_result());
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn invalidate_removes_matching_keys() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.put("notes:abc".to_string(), dummy_result());
        cache.put("users:xyz".to_string(), dummy_result());
        cache.invalidate(&Regex::new("^notes:").unwrap());
        assert!(cache.get("notes:abc").is_none());
        assert!(cache.get("users:xyz").is_some());
    }
}
