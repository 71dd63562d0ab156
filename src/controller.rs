//! Search Controller (C10). Composes auth → rate-limit → cache →
//! query-compile → backend-search → decode → post-process → cache-put for
//! every externally-facing search operation (spec.md §4.8). This is the
//! one component that touches every other component in the core — the
//! same "thin orchestration, no business logic of its own" role the
//! teacher's route handlers play over `ChatState`.

use crate::auth::Principal;
use crate::backend::BackendClient;
use crate::cache::ResponseCache;
use crate::config::Tier;
use crate::error::ServiceError;
use crate::metrics::{ServiceMetrics, SlowQueryEntry, SlowQueryLog};
use crate::models::{
    Pagination, PersonalizationContext, SearchQuery, SearchResponse, SearchResult, SearchType, SortOrder, SuggestionResult,
};
use crate::rate_limit::{RateLimitInfo, RateLimiter, TierTable};
use crate::{query, results};
use serde_json::json;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const NOTES_INDEX: &str = "notes";
const USERS_INDEX: &str = "users";
const HASHTAGS_INDEX: &str = "hashtags";

const TRENDING_REFRESH: Duration = Duration::from_secs(5 * 60);
const SUGGESTION_REFRESH: Duration = Duration::from_secs(10 * 60);
const SUGGESTION_MIN_PREFIX: usize = 2;

struct TrendingCache<T> {
    value: Option<T>,
    refreshed_at: Option<Instant>,
}

impl<T> Default for TrendingCache<T> {
    fn default() -> Self {
        Self { value: None, refreshed_at: None }
    }
}

impl<T: Clone> TrendingCache<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        match (&self.value, self.refreshed_at) {
            (Some(v), Some(at)) if at.elapsed() < ttl => Some(v.clone()),
            _ => None,
        }
    }

    fn store(&mut self, value: T) {
        self.value = Some(value);
        self.refreshed_at = Some(Instant::now());
    }
}

pub struct SearchController {
    backend: std::sync::Arc<BackendClient>,
    cache: std::sync::Arc<ResponseCache>,
    rate_limiter: std::sync::Arc<RateLimiter>,
    tier_table: std::sync::Arc<TierTable>,
    metrics: std::sync::Arc<ServiceMetrics>,
    slow_query_log: std::sync::Arc<SlowQueryLog>,
    slow_query_threshold: Duration,
    trending_hashtags: Mutex<TrendingCache<Vec<crate::models::HashtagResult>>>,
    trending_users: Mutex<TrendingCache<Vec<crate::models::UserResult>>>,
    suggestion_terms: Mutex<TrendingCache<Vec<(String, u64)>>>,
}

impl SearchController {
    pub fn new(
        backend: std::sync::Arc<BackendClient>,
        cache: std::sync::Arc<ResponseCache>,
        rate_limiter: std::sync::Arc<RateLimiter>,
        tier_table: std::sync::Arc<TierTable>,
        metrics: std::sync::Arc<ServiceMetrics>,
        slow_query_log: std::sync::Arc<SlowQueryLog>,
        slow_query_threshold: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            rate_limiter,
            tier_table,
            metrics,
            slow_query_log,
            slow_query_threshold,
            trending_hashtags: Mutex::new(TrendingCache::default()),
            trending_users: Mutex::new(TrendingCache::default()),
            suggestion_terms: Mutex::new(TrendingCache::default()),
        }
    }

    /// Unauthenticated callers missing `public_search` are rejected before
    /// any rate-limit check or backend contact (spec.md §4.8).
    fn check_auth(&self, rpc: &'static str, principal: &Principal) -> Result<(), ServiceError> {
        if !principal.authenticated && !principal.has_permission("public_search") {
            self.metrics.rpc_auth_failures.with_label_values(&[rpc]).inc();
            return Err(ServiceError::AuthenticationRequired);
        }
        Ok(())
    }

    fn check_rate_limit(&self, rpc: &'static str, client_key: &str, principal: &Principal) -> Result<RateLimitInfo, ServiceError> {
        let tier = self.tier_table.get(principal.tier);
        let info = self.rate_limiter.check(client_key, &tier);
        if !info.allowed {
            self.metrics.rpc_rate_limited.with_label_values(&[rpc]).inc();
            return Err(ServiceError::RateLimitExceeded { retry_after_secs: info.retry_after_secs });
        }
        Ok(info)
    }

    fn record_outcome(&self, rpc: &'static str, started: Instant, result: &Result<SearchResult, ServiceError>) -> u64 {
        let took_ms = started.elapsed().as_millis() as u64;
        self.metrics.rpc_total.with_label_values(&[rpc]).inc();
        self.metrics.response_time_ms.with_label_values(&[rpc]).observe(took_ms as f64);
        match result {
            Ok(_) => {
                self.metrics.rpc_success.with_label_values(&[rpc]).inc();
            }
            Err(_) => {
                self.metrics.rpc_failed.with_label_values(&[rpc]).inc();
            }
        }
        if took_ms >= self.slow_query_threshold.as_millis() as u64 {
            if let Ok(result) = result {
                self.slow_query_log.record(SlowQueryEntry {
                    query: rpc.to_string(),
                    took_ms,
                    indices: vec![rpc.to_string()],
                    hits_total: result.metadata.total,
                });
            }
        }
        took_ms
    }

    async fn run_search(
        &self,
        rpc: &'static str,
        index: &str,
        mut search_query: SearchQuery,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, ServiceError> {
        query::clamp_limit(&mut search_query);
        if !query::is_valid(&search_query) {
            return Err(ServiceError::InvalidQuery("empty text and no filters, or limit out of range".to_string()));
        }

        let fingerprint = query::fingerprint(&search_query, &search_query.personalization);
        let cache_key = format!("{rpc}:{fingerprint}");

        if search_query.config.use_cache {
            if let Some(mut cached) = self.cache.get(&cache_key) {
                self.metrics.cache_hits.with_label_values(&[rpc]).inc();
                cached.metadata.served_from_cache = true;
                return Ok(cached);
            }
            self.metrics.cache_misses.with_label_values(&[rpc]).inc();
        }

        let compiled = query::compile(&search_query);
        let timeout_ms = search_query.config.timeout_ms;

        let raw = tokio::time::timeout(Duration::from_millis(timeout_ms), self.backend.search(cancel, &[index.to_string()], &compiled))
            .await
            .map_err(|_| ServiceError::Timeout)?
            .map_err(ServiceError::from)?;

        let (notes, users, hashtags) = results::decode_hits(&raw);
        let total = results::total_hits(&raw);
        let max_score = results::max_score(&raw);

        let mut result = SearchResult {
            notes,
            users,
            hashtags,
            suggestions: Vec::new(),
            mixed: Vec::new(),
            aggregations: results::empty_aggregations(),
            metadata: results::build_metadata(fingerprint.clone(), 0, false, total, max_score),
        };
        result = results::post_process(result, principal.authenticated);
        if search_query.search_type == SearchType::Mixed {
            result.mixed = results::reorder_mixed(&result);
        }

        if search_query.config.use_cache && !result.is_empty() {
            self.cache.put(cache_key, result.clone());
        }

        Ok(result)
    }

    pub async fn search_notes(
        &self,
        mut search_query: SearchQuery,
        client_key: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse<SearchResult>, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if let Err(e) = self.check_auth("search_notes", principal) {
            return Ok(Self::error_response(request_id, started, e));
        }
        if let Err(e) = self.check_rate_limit("search_notes", client_key, principal) {
            return Ok(Self::error_response(request_id, started, e));
        }

        search_query.search_type = SearchType::Notes;
        let result = self.run_search("search_notes", NOTES_INDEX, search_query, principal, cancel).await;
        let took_ms = self.record_outcome("search_notes", started, &result);

        match result {
            Ok(r) => Ok(SearchResponse::ok(request_id, took_ms, r.metadata.served_from_cache, r)),
            Err(e) => Ok(SearchResponse::err(request_id, took_ms, e.code(), e.to_string())),
        }
    }

    pub async fn search_users(
        &self,
        mut search_query: SearchQuery,
        client_key: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse<SearchResult>, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if let Err(e) = self.check_auth("search_users", principal) {
            return Ok(Self::error_response(request_id, started, e));
        }
        if let Err(e) = self.check_rate_limit("search_users", client_key, principal) {
            return Ok(Self::error_response(request_id, started, e));
        }

        search_query.search_type = SearchType::Users;
        let result = self.run_search("search_users", USERS_INDEX, search_query, principal, cancel).await;
        let took_ms = self.record_outcome("search_users", started, &result);

        match result {
            Ok(r) => Ok(SearchResponse::ok(request_id, took_ms, r.metadata.served_from_cache, r)),
            Err(e) => Ok(SearchResponse::err(request_id, took_ms, e.code(), e.to_string())),
        }
    }

    fn error_response<T: serde::Serialize>(request_id: String, started: Instant, err: ServiceError) -> SearchResponse<T> {
        SearchResponse::err(request_id, started.elapsed().as_millis() as u64, err.code(), err.to_string())
    }

    /// Refreshes and returns the top trending hashtags, recomputing from
    /// the backend at most once every 5 minutes (spec.md §4.8).
    pub async fn get_trending_hashtags(
        &self,
        limit: u32,
        client_key: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse<Vec<crate::models::HashtagResult>>, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if let Err(e) = self.check_rate_limit("trending_hashtags", client_key, principal) {
            return Ok(Self::error_response(request_id, started, e));
        }

        if let Some(cached) = self.trending_hashtags.lock().unwrap_or_else(|e| e.into_inner()).fresh(TRENDING_REFRESH) {
            return Ok(SearchResponse::ok(request_id, started.elapsed().as_millis() as u64, true, cached));
        }

        let doc = json!({ "query": { "match_all": {} }, "sort": [{ "trending_score": "desc" }], "size": limit });
        let raw = self.backend.search(cancel, &[HASHTAGS_INDEX.to_string()], &doc).await.map_err(ServiceError::from);

        let took_ms = started.elapsed().as_millis() as u64;
        match raw {
            Ok(raw) => {
                let (_, _, hashtags) = results::decode_hits(&raw);
                self.trending_hashtags.lock().unwrap_or_else(|e| e.into_inner()).store(hashtags.clone());
                Ok(SearchResponse::ok(request_id, took_ms, false, hashtags))
            }
            Err(e) => Ok(Self::error_response(request_id, started, e)),
        }
    }

    /// Same refresh discipline as `get_trending_hashtags`, sorted by
    /// reputation instead (spec.md §4.8).
    pub async fn get_trending_users(
        &self,
        limit: u32,
        client_key: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse<Vec<crate::models::UserResult>>, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if let Err(e) = self.check_rate_limit("trending_users", client_key, principal) {
            return Ok(Self::error_response(request_id, started, e));
        }

        if let Some(cached) = self.trending_users.lock().unwrap_or_else(|e| e.into_inner()).fresh(TRENDING_REFRESH) {
            return Ok(SearchResponse::ok(request_id, started.elapsed().as_millis() as u64, true, cached));
        }

        let doc = json!({ "query": { "match_all": {} }, "sort": [{ "reputation": "desc" }], "size": limit });
        let raw = self.backend.search(cancel, &[USERS_INDEX.to_string()], &doc).await.map_err(ServiceError::from);

        let took_ms = started.elapsed().as_millis() as u64;
        match raw {
            Ok(raw) => {
                let result = results::post_process(
                    SearchResult {
                        notes: vec![],
                        users: results::decode_hits(&raw).1,
                        hashtags: vec![],
                        suggestions: vec![],
                        mixed: vec![],
                        aggregations: results::empty_aggregations(),
                        metadata: results::build_metadata("trending_users".to_string(), took_ms, false, 0, 0.0),
                    },
                    principal.authenticated,
                );
                self.trending_users.lock().unwrap_or_else(|e| e.into_inner()).store(result.users.clone());
                Ok(SearchResponse::ok(request_id, took_ms, false, result.users))
            }
            Err(e) => Ok(Self::error_response(request_id, started, e)),
        }
    }

    /// Completion suggestions drawn from the cached popular-terms list,
    /// refreshed from trending hashtags at most once every 10 minutes.
    /// Rejects prefixes shorter than `SUGGESTION_MIN_PREFIX` (spec.md §4.8).
    pub async fn get_suggestions(
        &self,
        prefix: &str,
        client_key: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse<Vec<SuggestionResult>>, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if let Err(e) = self.check_rate_limit("suggestions", client_key, principal) {
            return Ok(Self::error_response(request_id, started, e));
        }
        if prefix.chars().count() < SUGGESTION_MIN_PREFIX {
            return Ok(Self::error_response(
                request_id,
                started,
                ServiceError::InvalidQuery(format!("prefix must be at least {SUGGESTION_MIN_PREFIX} characters")),
            ));
        }

        let terms = self.suggestion_terms.lock().unwrap_or_else(|e| e.into_inner()).fresh(SUGGESTION_REFRESH);
        let terms = match terms {
            Some(t) => t,
            None => {
                let doc = json!({ "query": { "match_all": {} }, "sort": [{ "total_uses": "desc" }], "size": 500 });
                let raw = self.backend.search(cancel, &[HASHTAGS_INDEX.to_string()], &doc).await.map_err(ServiceError::from);
                match raw {
                    Ok(raw) => {
                        let (_, _, hashtags) = results::decode_hits(&raw);
                        let fresh: Vec<(String, u64)> = hashtags.into_iter().map(|h| (h.hashtag, h.total_uses)).collect();
                        self.suggestion_terms.lock().unwrap_or_else(|e| e.into_inner()).store(fresh.clone());
                        fresh
                    }
                    Err(e) => return Ok(Self::error_response(request_id, started, e)),
                }
            }
        };

        let suggestions = results::suggestions_from_texts(&terms, prefix);
        Ok(SearchResponse::ok(request_id, started.elapsed().as_millis() as u64, false, suggestions))
    }

    /// Live prefix completion against usernames and hashtags, bypassing the
    /// suggestion cache entirely — for the "as you type" UI case where
    /// freshness matters more than latency (spec.md §4.8).
    pub async fn autocomplete(
        &self,
        prefix: &str,
        client_key: &str,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse<Vec<SuggestionResult>>, ServiceError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        if let Err(e) = self.check_rate_limit("autocomplete", client_key, principal) {
            return Ok(Self::error_response(request_id, started, e));
        }
        if prefix.is_empty() {
            return Ok(SearchResponse::ok(request_id, started.elapsed().as_millis() as u64, false, Vec::new()));
        }

        let doc = json!({
            "query": { "bool": { "should": [
                { "match_phrase_prefix": { "username": prefix } },
                { "match_phrase_prefix": { "hashtags": prefix } },
            ] } },
            "size": 10,
        });

        let raw = self
            .backend
            .search(cancel, &[USERS_INDEX.to_string(), HASHTAGS_INDEX.to_string()], &doc)
            .await
            .map_err(ServiceError::from);

        let took_ms = started.elapsed().as_millis() as u64;
        match raw {
            Ok(raw) => {
                let (_, users, hashtags) = results::decode_hits(&raw);
                let mut suggestions: Vec<SuggestionResult> = users
                    .into_iter()
                    .map(|u| SuggestionResult {
                        suggestion_text: u.username.clone(),
                        completion_text: results::byte_suffix(&u.username, prefix.len()).to_string(),
                        confidence_score: u.relevance_score,
                        estimated_results: 1,
                    })
                    .chain(hashtags.into_iter().map(|h| SuggestionResult {
                        suggestion_text: format!("#{}", h.hashtag),
                        completion_text: results::byte_suffix(&h.hashtag, prefix.len()).to_string(),
                        confidence_score: h.trending_score,
                        estimated_results: h.total_uses,
                    }))
                    .collect();
                suggestions.sort_by(|a, b| b.confidence_score.partial_cmp(&a.confidence_score).unwrap_or(std::cmp::Ordering::Equal));
                Ok(SearchResponse::ok(request_id, took_ms, false, suggestions))
            }
            Err(e) => Ok(Self::error_response(request_id, started, e)),
        }
    }
}

/// Builds a default query for a free-text search request — used by route
/// handlers to turn `?q=...&type=...` into a `SearchQuery` before handing
/// it to the controller.
pub fn build_query(text: &str, search_type: SearchType, sort: SortOrder, offset: u32, limit: u32, viewer_id: Option<String>) -> SearchQuery {
    let now = chrono::Utc::now();
    let mut search_query = query::parse_query(text, now, search_type, sort);
    search_query.pagination = Pagination { offset, limit };
    search_query.personalization = PersonalizationContext { viewer_id, ..PersonalizationContext::default() };
    search_query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, RateLimitTier};
    use crate::error::ErrorCode;
    use std::sync::Arc;

    fn controller() -> SearchController {
        let backend = Arc::new(BackendClient::new(BackendConfig::from_env()).unwrap());
        let cache = Arc::new(ResponseCache::new(100, Duration::from_secs(60)));
        let rate_limiter = Arc::new(RateLimiter::new());
        let tier_table = Arc::new(TierTable::new(std::collections::HashMap::from([(
            Tier::Anonymous,
            RateLimitTier { rpm: 6000, burst: 1000 },
        )])));
        let metrics = Arc::new(ServiceMetrics::new());
        let slow_query_log = Arc::new(SlowQueryLog::new());
        SearchController::new(backend, cache, rate_limiter, tier_table, metrics, slow_query_log, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn empty_query_without_filters_is_rejected_before_any_backend_call() {
        let controller = controller();
        let principal = Principal::anonymous();
        let cancel = CancellationToken::new();
        let search_query = build_query("", SearchType::Notes, SortOrder::Relevance, 0, 20, None);
        let response = controller.search_notes(search_query, "anon", &principal, &cancel).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code, Some(ErrorCode::InvalidQuery));
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_short_circuits_before_backend_call() {
        let backend = Arc::new(BackendClient::new(BackendConfig::from_env()).unwrap());
        let cache = Arc::new(ResponseCache::new(100, Duration::from_secs(60)));
        let rate_limiter = Arc::new(RateLimiter::new());
        let tier_table = Arc::new(TierTable::new(std::collections::HashMap::from([(
            Tier::Anonymous,
            RateLimitTier { rpm: 60, burst: 1 },
        )])));
        let metrics = Arc::new(ServiceMetrics::new());
        let slow_query_log = Arc::new(SlowQueryLog::new());
        let controller =
            SearchController::new(backend, cache, rate_limiter, tier_table, metrics, slow_query_log, Duration::from_millis(500));
        let principal = Principal::anonymous();
        let cancel = CancellationToken::new();

        let q1 = build_query("coffee", SearchType::Notes, SortOrder::Relevance, 0, 20, None);
        let q2 = build_query("coffee", SearchType::Notes, SortOrder::Relevance, 0, 20, None);
        let _ = controller.search_notes(q1, "same-key", &principal, &cancel).await;
        let second = controller.search_notes(q2, "same-key", &principal, &cancel).await.unwrap();
        assert!(!second.success);
        assert_eq!(second.error_code, Some(ErrorCode::RateLimitExceeded));
    }

    #[tokio::test]
    async fn suggestion_prefix_below_minimum_is_rejected() {
        let controller = controller();
        let principal = Principal::anonymous();
        let cancel = CancellationToken::new();
        let response = controller.get_suggestions("a", "anon", &principal, &cancel).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code, Some(ErrorCode::InvalidQuery));
    }

    #[tokio::test]
    async fn unauthenticated_principal_without_public_search_is_rejected() {
        let controller = controller();
        let principal = Principal { authenticated: false, user_id: None, permissions: vec![], tier: Tier::Anonymous };
        let cancel = CancellationToken::new();
        let search_query = build_query("coffee", SearchType::Notes, SortOrder::Relevance, 0, 20, None);
        let response = controller.search_notes(search_query, "anon", &principal, &cancel).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_code, Some(ErrorCode::AuthenticationRequired));
    }
}
