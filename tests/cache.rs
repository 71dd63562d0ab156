//! Integration coverage for the Response Cache (C7), keyed the way the
//! controller actually keys it: by a query fingerprint from `query.rs`
//! rather than an arbitrary test string.

use chrono::Utc;
use sonet_search_service::cache::ResponseCache;
use sonet_search_service::models::{Aggregations, PersonalizationContext, ResultMetadata, SearchResult, SearchType, SortOrder};
use sonet_search_service::{query, results};
use std::time::Duration;

fn empty_result(query_id: &str) -> SearchResult {
    SearchResult {
        notes: vec![],
        users: vec![],
        hashtags: vec![],
        suggestions: vec![],
        mixed: vec![],
        aggregations: Aggregations::default(),
        metadata: ResultMetadata { query_id: query_id.to_string(), ..results::build_metadata(query_id.to_string(), 5, false, 0, 0.0) },
    }
}

#[test]
fn cache_round_trips_using_a_real_query_fingerprint() {
    let cache = ResponseCache::new(10, Duration::from_secs(60));
    let now = Utc::now();
    let q = query::parse_query("coffee", now, SearchType::Notes, SortOrder::Relevance);
    let key = query::fingerprint(&q, &PersonalizationContext::default());

    assert!(cache.get(&key).is_none());
    cache.put(key.clone(), empty_result("req-1"));
    let hit = cache.get(&key).expect("just inserted");
    assert_eq!(hit.metadata.query_id, "req-1");
}

#[test]
fn distinct_queries_produce_distinct_cache_entries() {
    let cache = ResponseCache::new(10, Duration::from_secs(60));
    let now = Utc::now();
    let q1 = query::parse_query("coffee", now, SearchType::Notes, SortOrder::Relevance);
    let q2 = query::parse_query("tea", now, SearchType::Notes, SortOrder::Relevance);
    let personalization = PersonalizationContext::default();

    let key1 = query::fingerprint(&q1, &personalization);
    let key2 = query::fingerprint(&q2, &personalization);
    assert_ne!(key1, key2);

    cache.put(key1.clone(), empty_result("req-coffee"));
    assert!(cache.get(&key2).is_none());
    assert_eq!(cache.get(&key1).unwrap().metadata.query_id, "req-coffee");
}

#[test]
fn sweep_expired_drops_stale_entries_without_waiting_on_get() {
    let cache = ResponseCache::new(10, Duration::from_millis(1));
    cache.put("k".to_string(), empty_result("req-2"));
    std::thread::sleep(Duration::from_millis(5));
    cache.sweep_expired();
    assert!(cache.is_empty());
}
