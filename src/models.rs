//! Document and request/response shapes from spec.md §3. These are plain
//! serde structs — the same shape the teacher's `models.rs` uses for
//! `Message`/`Room`, just with the note/user fields this service needs.

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    Followers,
    Private,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
    pub views: u64,
    pub engagement_score: f64,
    pub virality_score: f64,
    pub trending_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    None,
    Email,
    Phone,
    Identity,
    Organization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    pub followers: u64,
    pub following: u64,
    pub reputation: f64,
    pub verification: VerificationLevel,
}

impl Default for AuthorSnapshot {
    fn default() -> Self {
        Self { followers: 0, following: 0, reputation: 0.0, verification: VerificationLevel::None }
    }
}

/// Multiplicative score boosts; 1.0 is neutral (spec.md §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoostFactors {
    pub recency: f64,
    pub engagement: f64,
    pub author: f64,
    pub content_quality: f64,
}

impl Default for BoostFactors {
    fn default() -> Self {
        Self { recency: 1.0, engagement: 1.0, author: 1.0, content_quality: 1.0 }
    }
}

/// A note (short-text post) document, owned by the ingest pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteDocument {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub display_name: String,

    pub text: String,
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub media_urls: Vec<String>,
    pub language: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost_of_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    pub visibility: Visibility,
    pub nsfw: bool,
    pub sensitive: bool,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,

    pub metrics: EngagementMetrics,
    pub author: AuthorSnapshot,
    pub boosts: BoostFactors,

    /// Set by the analyzer; `None` means "needs (re)analysis" — used to
    /// distinguish a freshly-received note from a metrics-only update
    /// (spec.md §4.4 step 3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spam_score: Option<f64>,
    #[serde(default)]
    pub is_bot_author: bool,

    /// Set alongside `quality_score`/`spam_score` by the same analysis pass
    /// (spec.md §4.2 "extract topics ... sentiment").
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<crate::analyzer::Sentiment>,
}

impl NoteDocument {
    /// Mirrors `NoteDocument::should_be_indexed()` from the C++ original:
    /// private, empty, spammy or likely-bot content never reaches the
    /// backend (spec.md §4.4 "Indexability gate").
    pub fn should_be_indexed(&self, index_spam: bool, index_nsfw: bool, index_bots: bool) -> bool {
        if self.visibility == Visibility::Private {
            return false;
        }
        if self.text.trim().is_empty() {
            return false;
        }
        if !index_nsfw && (self.nsfw || self.sensitive) {
            return false;
        }
        if !index_spam && self.spam_score.unwrap_or(0.0) >= 0.7 {
            return false;
        }
        if !index_bots && self.is_bot_author {
            return false;
        }
        true
    }

    /// Shard routing hint derived from `user_id`, per `get_routing_key()`
    /// in the original C++ indexer (SPEC_FULL.md §3).
    pub fn routing_key(&self) -> String {
        self.user_id.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Deleted,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub level: VerificationLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
}

impl Default for VerificationRecord {
    fn default() -> Self {
        Self { level: VerificationLevel::None, verified_at: None, badge: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocialMetrics {
    pub followers: u64,
    pub following: u64,
    pub notes_count: u64,
    pub likes_given: u64,
    pub likes_received: u64,
}

/// A user-profile document, owned by the ingest pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDocument {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub last_active_at: chrono::DateTime<chrono::Utc>,

    pub verification: VerificationRecord,
    pub social: SocialMetrics,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reputation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub influence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticity: Option<f64>,

    pub is_private: bool,
    pub searchable: bool,
    pub indexable: bool,
    pub status: UserStatus,

    pub boosts: BoostFactors,
}

impl UserDocument {
    /// Invariant from spec.md §3: not indexable/searchable, or suspended/
    /// deleted, must never appear in — or reach — the index.
    pub fn should_be_indexed(&self, index_bots: bool) -> bool {
        if !self.indexable || !self.searchable {
            return false;
        }
        if matches!(self.status, UserStatus::Suspended | UserStatus::Deleted) {
            return false;
        }
        if !index_bots && self.status == UserStatus::Bot {
            return false;
        }
        true
    }
}

// --- Search request/response shapes (C5/C6) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Notes,
    Users,
    Hashtags,
    Mentions,
    Mixed,
    Media,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Relevance,
    Recency,
    Popularity,
    Trending,
    MixedSignals,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub from_date: Option<chrono::DateTime<chrono::Utc>>,
    pub to_date: Option<chrono::DateTime<chrono::Utc>>,

    pub from_user: Option<String>,
    pub mentioned_users: Vec<String>,
    pub excluded_users: Vec<String>,

    pub hashtags: Vec<String>,
    pub excluded_hashtags: Vec<String>,

    pub has_media: Option<bool>,
    pub has_links: Option<bool>,
    pub verified_only: Option<bool>,

    pub min_likes: Option<u64>,
    pub min_reposts: Option<u64>,
    pub min_replies: Option<u64>,

    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_km: Option<f64>,

    pub language: Option<String>,
    pub content_types: Vec<String>,
}

impl SearchFilters {
    pub fn has_filters(&self) -> bool {
        self.from_date.is_some()
            || self.to_date.is_some()
            || self.from_user.is_some()
            || !self.mentioned_users.is_empty()
            || !self.excluded_users.is_empty()
            || !self.hashtags.is_empty()
            || !self.excluded_hashtags.is_empty()
            || self.has_media.is_some()
            || self.has_links.is_some()
            || self.verified_only.is_some()
            || self.min_likes.is_some()
            || self.min_reposts.is_some()
            || self.min_replies.is_some()
            || self.latitude.is_some()
            || self.language.is_some()
            || !self.content_types.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub enable_fuzzy_matching: bool,
    pub enable_stemming: bool,
    pub enable_spell_correction: bool,
    pub timeout_ms: u64,
    pub use_cache: bool,
    pub cache_ttl_minutes: u64,
    pub max_limit: u32,

    pub relevance_weight: f64,
    pub recency_weight: f64,
    pub popularity_weight: f64,
    pub user_reputation_weight: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enable_fuzzy_matching: true,
            enable_stemming: true,
            enable_spell_correction: true,
            timeout_ms: 5_000,
            use_cache: true,
            cache_ttl_minutes: 5,
            max_limit: 100,
            relevance_weight: 1.0,
            recency_weight: 0.3,
            popularity_weight: 0.5,
            user_reputation_weight: 0.2,
        }
    }
}

impl QueryConfig {
    /// Low-latency preset for `type=live` searches — SPEC_FULL.md §3.
    pub fn realtime() -> Self {
        Self { timeout_ms: 1_000, cache_ttl_minutes: 1, enable_spell_correction: false, ..Self::default() }
    }

    /// Longer-lived preset for trending/aggregation queries — SPEC_FULL.md §3.
    pub fn trending() -> Self {
        Self { timeout_ms: 10_000, cache_ttl_minutes: 5, recency_weight: 0.6, ..Self::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalizationContext {
    pub viewer_id: Option<String>,
    pub interests: Vec<String>,
    pub following: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub search_type: SearchType,
    pub sort: SortOrder,
    pub filters: SearchFilters,
    pub pagination: Pagination,
    pub config: QueryConfig,
    pub personalization: PersonalizationContext,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            search_type: SearchType::Mixed,
            sort: SortOrder::Relevance,
            filters: SearchFilters::default(),
            pagination: Pagination::default(),
            config: QueryConfig::default(),
            personalization: PersonalizationContext::default(),
        }
    }
}

// --- Result model (C6) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteResult {
    pub note_id: String,
    pub content: String,
    pub author_id: String,
    pub author_username: String,
    pub author_display_name: String,
    pub author_verified: bool,
    pub author_suspended: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,

    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
    pub views: u64,

    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub nsfw: bool,
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<crate::analyzer::Sentiment>,

    pub relevance_score: f64,
    pub highlights: HashMap<String, Vec<String>>,
}

impl NoteResult {
    /// Word-boundary-trimmed content preview, stripped of `<em>` highlight
    /// markers — spec.md §4.6 "content snippet with word-boundary trimming,
    /// HTML tag stripping".
    pub fn content_snippet(&self, max_len: usize) -> String {
        let plain = strip_em_tags(&self.content);
        if plain.chars().count() <= max_len {
            return plain;
        }
        let mut snippet: String = plain.chars().take(max_len).collect();
        if let Some(last_space) = snippet.rfind(' ') {
            snippet.truncate(last_space);
        }
        snippet.push('\u{2026}');
        snippet
    }

    pub fn relative_time(&self, now: chrono::DateTime<chrono::Utc>) -> String {
        relative_time(self.created_at, now)
    }
}

fn strip_em_tags(s: &str) -> String {
    s.replace("<em>", "").replace("</em>", "")
}

pub fn relative_time(at: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> String {
    let delta = now.signed_duration_since(at);
    let secs = delta.num_seconds();
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3_600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3_600)
    } else if secs < 7 * 86_400 {
        format!("{}d", secs / 86_400)
    } else {
        at.format("%Y-%m-%d").to_string()
    }
}

pub fn format_count(n: u64) -> String {
    if n < 1_000 {
        n.to_string()
    } else if n < 1_000_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResult {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub bio: String,
    pub verified: bool,
    pub is_suspended: bool,
    pub is_deleted: bool,
    pub followers: u64,
    pub following: u64,
    pub notes_count: u64,
    pub engagement_rate: f64,
    pub last_active_at: chrono::DateTime<chrono::Utc>,
    pub relevance_score: f64,
    pub highlights: HashMap<String, Vec<String>>,
}

impl UserResult {
    /// Ported from `UserResult::get_reputation_score()` (search_result.cpp):
    /// follower:following ratio (capped), verification boost, recency of
    /// activity, content volume, and engagement rate — summed and capped at
    /// 100 (SPEC_FULL.md §3).
    pub fn reputation_score(&self, now: chrono::DateTime<chrono::Utc>) -> f64 {
        let mut score = 0.0;

        let follower_ratio = if self.following > 0 { self.followers as f64 / self.following as f64 } else { self.followers as f64 };
        score += follower_ratio.min(100.0) * 0.3;

        if self.verified {
            score += 50.0;
        }

        let days_since_active = (now - self.last_active_at).num_hours() as f64 / 24.0;
        score += (30.0 - days_since_active).max(0.0) * 0.5;

        score += (self.notes_count as f64).min(10_000.0) / 1_000.0 * 10.0;

        score += self.engagement_rate * 20.0;

        score.min(100.0)
    }

    pub fn bio_snippet(&self, max_len: usize) -> String {
        if self.bio.chars().count() <= max_len {
            return self.bio.clone();
        }
        let mut snippet: String = self.bio.chars().take(max_len).collect();
        if let Some(last_space) = snippet.rfind(' ') {
            snippet.truncate(last_space);
        }
        snippet.push('\u{2026}');
        snippet
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashtagResult {
    pub hashtag: String,
    pub total_uses: u64,
    pub recent_uses_1h: u64,
    pub recent_uses_24h: u64,
    pub trending_score: f64,
    pub velocity: f64,
}

impl HashtagResult {
    /// `"hot"|"rising"|"stable"|"declining"` bucketing — SPEC_FULL.md §3,
    /// ported from `HashtagResult::get_trending_status()`.
    pub fn trending_status(&self) -> &'static str {
        if self.trending_score >= 0.7 && self.velocity > 0.5 {
            "hot"
        } else if self.velocity > 0.1 {
            "rising"
        } else if self.velocity > -0.1 {
            "stable"
        } else {
            "declining"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionResult {
    pub suggestion_text: String,
    pub completion_text: String,
    pub confidence_score: f64,
    pub estimated_results: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixedResultKind {
    Note,
    User,
    Hashtag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedEntry {
    pub kind: MixedResultKind,
    pub index: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aggregations {
    pub time_distribution: HashMap<String, u64>,
    pub top_hashtags: HashMap<String, u64>,
    pub language_distribution: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub query_id: String,
    pub took_ms: u64,
    pub served_from_cache: bool,
    pub total: u64,
    pub max_score: f64,
    pub applied_corrections: Vec<String>,
    pub rewritten_query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub notes: Vec<NoteResult>,
    pub users: Vec<UserResult>,
    pub hashtags: Vec<HashtagResult>,
    pub suggestions: Vec<SuggestionResult>,
    pub mixed: Vec<MixedEntry>,
    pub aggregations: Aggregations,
    pub metadata: ResultMetadata,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.users.is_empty() && self.hashtags.is_empty() && self.suggestions.is_empty()
    }
}

// --- Indexing task (C4) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOp {
    Create,
    Update,
    Delete,
    UpdateMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexableDocument {
    Note(Box<NoteDocument>),
    User(Box<UserDocument>),
}

impl IndexableDocument {
    pub fn id(&self) -> &str {
        match self {
            IndexableDocument::Note(n) => &n.id,
            IndexableDocument::User(u) => &u.id,
        }
    }
}

/// `(op, document, priority, enqueued_at, scheduled_at, retry_count,
/// correlation_id)` — spec.md §3 "Indexing task". Ordering within a queue
/// is strictly `(priority desc, scheduled_at asc)`.
#[derive(Debug, Clone)]
pub struct IndexingTask {
    pub op: IndexOp,
    pub document: IndexableDocument,
    pub priority: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub correlation_id: String,
}

impl IndexingTask {
    pub fn id(&self) -> &str {
        self.document.id()
    }
}

// --- Search response envelope (C10) ---

/// Uniform wrapper every controller entry point returns across the RPC
/// boundary — `payload` is set on success, `error_code`/`message` on
/// failure, never both (spec.md §4.8).
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse<T: Serialize> {
    pub success: bool,
    pub request_id: String,
    pub took_ms: u64,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T: Serialize> SearchResponse<T> {
    pub fn ok(request_id: String, took_ms: u64, cached: bool, payload: T) -> Self {
        Self { success: true, request_id, took_ms, cached, payload: Some(payload), error_code: None, message: None, timestamp: chrono::Utc::now() }
    }

    pub fn err(request_id: String, took_ms: u64, error_code: ErrorCode, message: String) -> Self {
        Self { success: false, request_id, took_ms, cached: false, payload: None, error_code: Some(error_code), message: Some(message), timestamp: chrono::Utc::now() }
    }
}
