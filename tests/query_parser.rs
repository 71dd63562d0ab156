//! Integration coverage for the Query Model (C5): operator extraction,
//! fingerprinting and the compiled backend document, exercised through the
//! crate's public `query` module only.

use chrono::Utc;
use sonet_search_service::models::{PersonalizationContext, SearchType, SortOrder};
use sonet_search_service::query;

#[test]
fn operators_are_stripped_into_filters_and_free_text_survives() {
    let now = Utc::now();
    let (residual, filters) = query::parse_query_text("rust from:@alice #rustlang min_likes:10", now);
    assert_eq!(residual.trim(), "rust");
    assert_eq!(filters.from_user.as_deref(), Some("alice"));
    assert_eq!(filters.hashtags, vec!["rustlang".to_string()]);
    assert_eq!(filters.min_likes, Some(10));
}

#[test]
fn fingerprint_changes_with_viewer_but_not_with_equal_anonymous_queries() {
    let now = Utc::now();
    let q1 = query::parse_query("coffee", now, SearchType::Notes, SortOrder::Relevance);
    let q2 = query::parse_query("coffee", now, SearchType::Notes, SortOrder::Relevance);

    let anon = PersonalizationContext::default();
    let fp1 = query::fingerprint(&q1, &anon);
    let fp2 = query::fingerprint(&q2, &anon);
    assert_eq!(fp1, fp2);
    assert!(!fp1.contains(":user:"));

    let viewer = PersonalizationContext { viewer_id: Some("u42".to_string()), ..PersonalizationContext::default() };
    let fp3 = query::fingerprint(&q1, &viewer);
    assert_ne!(fp1, fp3);
}

#[test]
fn empty_query_without_filters_is_invalid() {
    let now = Utc::now();
    let q = query::parse_query("", now, SearchType::Notes, SortOrder::Relevance);
    assert!(!query::is_valid(&q));
}

#[test]
fn compiled_document_carries_pagination_and_sort() {
    let now = Utc::now();
    let mut q = query::parse_query("#rustlang", now, SearchType::Notes, SortOrder::Relevance);
    q.pagination.limit = 25;
    q.pagination.offset = 10;
    let compiled = query::compile(&q);
    assert_eq!(compiled["from"], 10);
    assert_eq!(compiled["size"], 25);
}

#[test]
fn complexity_grows_with_more_filters_but_stays_bounded() {
    let now = Utc::now();
    let simple = query::parse_query("coffee", now, SearchType::Notes, SortOrder::Relevance);
    let loaded = query::parse_query(
        "coffee from:@alice #rustlang #async min_likes:5 min_renotes:3 since:7d near:\"nyc\" within:10km lang:en",
        now,
        SearchType::Notes,
        SortOrder::Relevance,
    );
    assert!(query::complexity(&loaded) > query::complexity(&simple));
    assert!(query::complexity(&loaded) <= 1.0);
}
