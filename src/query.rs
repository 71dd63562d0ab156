//! Query Model (C5): operator parser, cache-key fingerprint hasher, and
//! backend-query compiler. All three are pure functions over `SearchQuery`
//! — no I/O, matching the analyzer/scorer's "no network, no shared state"
//! texture (spec.md §4.5).

use crate::models::{PersonalizationContext, SearchFilters, SearchQuery, SearchType, SortOrder};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

static FROM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfrom:@?(\w+)").expect("valid from regex"));
static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").expect("valid mention regex"));
static HASHTAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").expect("valid hashtag regex"));
static SINCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bsince:(\S+)").expect("valid since regex"));
static UNTIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\buntil:(\S+)").expect("valid until regex"));
static MIN_LIKES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmin_likes:(\d+)").expect("valid min_likes regex"));
static MIN_RENOTES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmin_renotes:(\d+)").expect("valid min_renotes regex"));
static NEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)\bnear:"([^"]+)""#).expect("valid near regex"));
static WITHIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bwithin:(\d+(?:\.\d+)?)km").expect("valid within regex"));
static LANG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blang:(\w+)").expect("valid lang regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Resolves `Nh`/`Nd`/`Nw` relative offsets or an absolute
/// `YYYY-MM-DD[THH:MM:SS]` timestamp, both against `now` (spec.md §4.5).
fn resolve_time(token: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = token.to_lowercase();
    if let Some(digits) = lower.strip_suffix('h') {
        return digits.parse::<i64>().ok().map(|n| now - ChronoDuration::hours(n));
    }
    if let Some(digits) = lower.strip_suffix('d') {
        return digits.parse::<i64>().ok().map(|n| now - ChronoDuration::days(n));
    }
    if let Some(digits) = lower.strip_suffix('w') {
        return digits.parse::<i64>().ok().map(|n| now - ChronoDuration::weeks(n));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return Some(DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0)?, Utc));
    }
    None
}

/// Scans free text for operator tokens, strips them, and returns the
/// residual free-text query plus the populated filter struct.
pub fn parse_query_text(input: &str, now: DateTime<Utc>) -> (String, SearchFilters) {
    let mut residual = input.to_string();
    let mut filters = SearchFilters::default();

    if let Some(caps) = FROM_RE.captures(&residual) {
        filters.from_user = Some(caps[1].to_lowercase());
    }
    residual = FROM_RE.replace_all(&residual, "").to_string();

    for caps in MENTION_RE.captures_iter(&residual.clone()) {
        filters.mentioned_users.push(caps[1].to_lowercase());
    }
    residual = MENTION_RE.replace_all(&residual, "").to_string();

    for caps in HASHTAG_RE.captures_iter(&residual.clone()) {
        filters.hashtags.push(caps[1].to_lowercase());
    }
    residual = HASHTAG_RE.replace_all(&residual, "").to_string();

    if let Some(caps) = SINCE_RE.captures(&residual) {
        filters.from_date = resolve_time(&caps[1], now);
    }
    residual = SINCE_RE.replace_all(&residual, "").to_string();

    if let Some(caps) = UNTIL_RE.captures(&residual) {
        filters.to_date = resolve_time(&caps[1], now);
    }
    residual = UNTIL_RE.replace_all(&residual, "").to_string();

    if let Some(caps) = MIN_LIKES_RE.captures(&residual) {
        filters.min_likes = caps[1].parse().ok();
    }
    residual = MIN_LIKES_RE.replace_all(&residual, "").to_string();

    if let Some(caps) = MIN_RENOTES_RE.captures(&residual) {
        filters.min_reposts = caps[1].parse().ok();
    }
    residual = MIN_RENOTES_RE.replace_all(&residual, "").to_string();

    if let Some(caps) = NEAR_RE.captures(&residual.clone()) {
        filters.location = Some(caps[1].to_string());
    }
    residual = NEAR_RE.replace_all(&residual, "").to_string();

    if let Some(caps) = WITHIN_RE.captures(&residual) {
        filters.radius_km = caps[1].parse().ok();
    }
    residual = WITHIN_RE.replace_all(&residual, "").to_string();

    if let Some(caps) = LANG_RE.captures(&residual) {
        filters.language = Some(caps[1].to_lowercase());
    }
    residual = LANG_RE.replace_all(&residual, "").to_string();

    let residual = WHITESPACE_RE.replace_all(residual.trim(), " ").to_string();

    (residual, filters)
}

/// Parses `input` into a ready-to-compile `SearchQuery`, leaving
/// `search_type`/`sort`/`pagination`/`config` at caller-supplied defaults.
pub fn parse_query(input: &str, now: DateTime<Utc>, search_type: SearchType, sort: SortOrder) -> SearchQuery {
    let (text, filters) = parse_query_text(input, now);
    SearchQuery { text, search_type, sort, filters, ..SearchQuery::default() }
}

pub fn is_valid(query: &SearchQuery) -> bool {
    let has_text_or_filter = !query.text.trim().is_empty() || query.filters.has_filters();
    has_text_or_filter
        && query.pagination.limit > 0
        && query.pagination.limit <= query.config.max_limit
        && query.config.timeout_ms > 0
}

pub fn clamp_limit(query: &mut SearchQuery) {
    if query.pagination.limit > query.config.max_limit {
        query.pagination.limit = query.config.max_limit;
    }
}

/// Cheap pre-execution cost estimate ∈ [0,1]: one unit of filter count, plus
/// fixed units for fuzzy matching, stemming, spell correction, and
/// personalization — used to decide finer-grained slow-query sampling
/// before the backend round trip (SPEC_FULL.md §3, "get_complexity_score").
pub fn complexity(query: &SearchQuery) -> f64 {
    let filters = &query.filters;
    let mut units = 0u32;

    units += query.filters.hashtags.len() as u32;
    units += filters.excluded_hashtags.len() as u32;
    units += filters.mentioned_users.len() as u32;
    units += filters.excluded_users.len() as u32;
    units += filters.from_user.is_some() as u32;
    units += filters.from_date.is_some() as u32;
    units += filters.to_date.is_some() as u32;
    units += filters.has_media.is_some() as u32;
    units += filters.has_links.is_some() as u32;
    units += filters.verified_only.is_some() as u32;
    units += filters.min_likes.is_some() as u32;
    units += filters.min_reposts.is_some() as u32;
    units += filters.min_replies.is_some() as u32;
    units += filters.latitude.is_some() as u32;
    units += filters.language.is_some() as u32;

    units += query.config.enable_fuzzy_matching as u32;
    units += query.config.enable_stemming as u32;
    units += query.config.enable_spell_correction as u32;

    let has_personalization = query.personalization.viewer_id.is_some()
        && (!query.personalization.interests.is_empty() || !query.personalization.following.is_empty());
    units += has_personalization as u32 * 2;

    (units as f64 / 15.0).min(1.0)
}

/// `hash(text) ∥ type ∥ sort ∥ offset ∥ limit ∥ hash(filters-json) ∥
/// (optional) user:<id>` — stable across equivalent queries, and omits any
/// viewer identifier for anonymous callers (spec.md §4.5, testable
/// property 7).
pub fn fingerprint(query: &SearchQuery, personalization: &PersonalizationContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.text.as_bytes());
    let text_hash = hex::encode(hasher.finalize_reset());

    let filters_json = serde_json::to_string(&query.filters).unwrap_or_default();
    hasher.update(filters_json.as_bytes());
    let filters_hash = hex::encode(hasher.finalize());

    let mut key = format!(
        "{}:{:?}:{:?}:{}:{}:{}",
        text_hash, query.search_type, query.sort, query.pagination.offset, query.pagination.limit, filters_hash
    );

    if let Some(viewer_id) = &personalization.viewer_id {
        key.push_str(&format!(":user:{viewer_id}"));
    }

    key
}

fn time_range_filter(filters: &SearchFilters) -> Option<Value> {
    if filters.from_date.is_none() && filters.to_date.is_none() {
        return None;
    }
    let mut range = serde_json::Map::new();
    if let Some(from) = filters.from_date {
        range.insert("gte".to_string(), json!(from.to_rfc3339()));
    }
    if let Some(to) = filters.to_date {
        range.insert("lte".to_string(), json!(to.to_rfc3339()));
    }
    Some(json!({ "range": { "created_at": range } }))
}

/// Compiles a validated query into a backend query document per spec.md
/// §4.5's bool/filter/must_not/should/sort/pagination/highlight shape.
pub fn compile(query: &SearchQuery) -> Value {
    let must = if query.text.trim().is_empty() {
        json!({ "match_all": {} })
    } else {
        json!({
            "multi_match": {
                "query": query.text,
                "fields": ["content^3", "author.username^2", "author.display_name^2", "hashtags^1.5", "mentions"],
                "type": "best_fields",
                "operator": "and",
                "fuzziness": if query.config.enable_fuzzy_matching { "AUTO" } else { "0" },
            }
        })
    };

    let mut filter_clauses: Vec<Value> = Vec::new();
    if let Some(range) = time_range_filter(&query.filters) {
        filter_clauses.push(range);
    }
    if let Some(user) = &query.filters.from_user {
        filter_clauses.push(json!({ "term": { "author.username.keyword": user } }));
    }
    for mentioned in &query.filters.mentioned_users {
        filter_clauses.push(json!({ "term": { "mentions.username.keyword": mentioned } }));
    }
    for tag in &query.filters.hashtags {
        filter_clauses.push(json!({ "term": { "hashtags.keyword": tag } }));
    }
    if let Some(has_media) = query.filters.has_media {
        if has_media {
            filter_clauses.push(json!({ "exists": { "field": "media" } }));
        } else {
            filter_clauses.push(json!({ "bool": { "must_not": [{ "exists": { "field": "media" } }] } }));
        }
    }
    if let Some(has_links) = query.filters.has_links {
        if has_links {
            filter_clauses.push(json!({ "exists": { "field": "links" } }));
        } else {
            filter_clauses.push(json!({ "bool": { "must_not": [{ "exists": { "field": "links" } }] } }));
        }
    }
    if let Some(true) = query.filters.verified_only {
        filter_clauses.push(json!({ "term": { "author.verified": true } }));
    }
    if let Some(min_likes) = query.filters.min_likes {
        filter_clauses.push(json!({ "range": { "metrics.likes": { "gte": min_likes } } }));
    }
    if let Some(min_reposts) = query.filters.min_reposts {
        filter_clauses.push(json!({ "range": { "metrics.reposts": { "gte": min_reposts } } }));
    }
    if let Some(min_replies) = query.filters.min_replies {
        filter_clauses.push(json!({ "range": { "metrics.replies": { "gte": min_replies } } }));
    }
    if let (Some(lat), Some(lon), Some(radius)) =
        (query.filters.latitude, query.filters.longitude, query.filters.radius_km)
    {
        filter_clauses.push(json!({
            "geo_distance": { "distance": format!("{radius}km"), "location": { "lat": lat, "lon": lon } }
        }));
    }
    if let Some(lang) = &query.filters.language {
        filter_clauses.push(json!({ "term": { "language": lang } }));
    }

    let mut must_not: Vec<Value> = Vec::new();
    for excluded in &query.filters.excluded_users {
        must_not.push(json!({ "term": { "author.username.keyword": excluded } }));
    }
    for excluded in &query.filters.excluded_hashtags {
        must_not.push(json!({ "term": { "hashtags.keyword": excluded } }));
    }

    let mut should: Vec<Value> = Vec::new();
    if query.personalization.viewer_id.is_some() {
        if !query.personalization.following.is_empty() {
            should.push(json!({ "terms": { "author.id.keyword": query.personalization.following, "boost": 2.0 } }));
        }
        for interest in &query.personalization.interests {
            should.push(json!({ "match": { "content": { "query": interest, "boost": 1.5 } } }));
        }
    }

    let mut bool_query = serde_json::Map::new();
    bool_query.insert("must".to_string(), must);
    if !filter_clauses.is_empty() {
        bool_query.insert("filter".to_string(), json!(filter_clauses));
    }
    if !must_not.is_empty() {
        bool_query.insert("must_not".to_string(), json!(must_not));
    }
    if !should.is_empty() {
        bool_query.insert("should".to_string(), json!(should));
    }

    let inner_query = json!({ "bool": bool_query });

    let query_section = match query.sort {
        SortOrder::MixedSignals => json!({
            "function_score": {
                "query": inner_query,
                "functions": [
                    { "field_value_factor": { "field": "metrics.likes", "modifier": "log1p", "factor": query.config.popularity_weight } },
                    { "gauss": { "created_at": { "scale": "7d", "decay": 0.5 } }, "weight": query.config.recency_weight },
                ],
                "score_mode": "sum",
                "boost_mode": "multiply",
            }
        }),
        _ => inner_query,
    };

    let sort_section = match query.sort {
        SortOrder::Relevance => json!([{ "_score": "desc" }]),
        SortOrder::Recency => json!([{ "created_at": "desc" }]),
        SortOrder::Popularity => json!([{ "metrics.engagement_score": "desc" }, "_score"]),
        SortOrder::Trending => json!([{ "metrics.trending_score": "desc" }, { "created_at": "desc" }]),
        SortOrder::MixedSignals => json!(["_score"]),
    };

    json!({
        "query": query_section,
        "sort": sort_section,
        "from": query.pagination.offset,
        "size": query.pagination.limit,
        "_source": ["*"],
        "highlight": { "fields": { "content": {}, "display_name": {} } },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortOrder;

    #[test]
    fn operator_parse_extracts_all_tokens() {
        let now = Utc::now();
        let (text, filters) = parse_query_text("from:@alice #coffee since:2d min_likes:50 latte", now);
        assert_eq!(text, "latte");
        assert_eq!(filters.from_user.as_deref(), Some("alice"));
        assert_eq!(filters.hashtags, vec!["coffee".to_string()]);
        assert_eq!(filters.min_likes, Some(50));
        let expected = now - ChronoDuration::hours(48);
        assert!((filters.from_date.unwrap() - expected).num_seconds().abs() < 2);
    }

    #[test]
    fn near_and_within_parse_geo_filter() {
        let now = Utc::now();
        let (_, filters) = parse_query_text(r#"near:"San Francisco" within:5km food"#, now);
        assert_eq!(filters.location.as_deref(), Some("San Francisco"));
        assert_eq!(filters.radius_km, Some(5.0));
    }

    #[test]
    fn fingerprint_stable_for_same_inputs_differs_by_viewer() {
        let q = SearchQuery { text: "latte".to_string(), sort: SortOrder::Relevance, ..SearchQuery::default() };
        let anon = PersonalizationContext::default();
        let u1 = PersonalizationContext { viewer_id: Some("u1".to_string()), ..Default::default() };
        let u2 = PersonalizationContext { viewer_id: Some("u2".to_string()), ..Default::default() };

        assert_eq!(fingerprint(&q, &anon), fingerprint(&q, &anon));
        assert_ne!(fingerprint(&q, &u1), fingerprint(&q, &u2));
        assert_ne!(fingerprint(&q, &anon), fingerprint(&q, &u1));
    }

    #[test]
    fn anonymous_fingerprint_has_no_viewer_marker() {
        let q = SearchQuery::default();
        let anon = PersonalizationContext::default();
        assert!(!fingerprint(&q, &anon).contains("user:"));
    }

    #[test]
    fn empty_text_without_filters_is_invalid() {
        let q = SearchQuery::default();
        assert!(!is_valid(&q));
    }

    #[test]
    fn limit_clamps_to_max() {
        let mut q = SearchQuery::default();
        q.pagination.limit = 10_000;
        clamp_limit(&mut q);
        assert_eq!(q.pagination.limit, q.config.max_limit);
    }

    #[test]
    fn mixed_signals_sort_uses_function_score() {
        let mut q = SearchQuery { text: "test".to_string(), sort: SortOrder::MixedSignals, ..SearchQuery::default() };
        q.config.popularity_weight = 0.5;
        let doc = compile(&q);
        assert!(doc["query"]["function_score"].is_object());
    }

    #[test]
    fn complexity_grows_with_filter_count() {
        let now = Utc::now();
        let plain = parse_query("just some text", now, SearchType::Notes, SortOrder::Relevance);
        let (_, filters) = parse_query_text(
            "from:@alice #rust #async min_likes:10 near:\"NYC\" within:5km lang:en",
            now,
        );
        let filtered = SearchQuery { text: "text".to_string(), filters, ..SearchQuery::default() };
        assert!(complexity(&filtered) > complexity(&plain));
    }

    #[test]
    fn complexity_is_bounded_to_one() {
        let mut q = SearchQuery::default();
        q.filters.hashtags = (0..50).map(|i| format!("tag{i}")).collect();
        assert!(complexity(&q) <= 1.0);
    }
}
