//! Result Model (C6). Decodes the backend's raw hit stream into typed
//! records and applies the post-processing rules from spec.md §4.6 — pure
//! functions over `serde_json::Value`, no I/O.

use crate::models::{
    Aggregations, HashtagResult, MixedEntry, MixedResultKind, NoteResult, ResultMetadata, SearchResult,
    SuggestionResult, UserResult,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;

/// Returns the tail of `text` starting at the byte offset `prefix_len`,
/// rounded down to the nearest char boundary. A caller's matched prefix
/// isn't guaranteed to be a byte-for-byte prefix of `text` (analyzed/
/// case-folded matching can change byte lengths), so indexing at
/// `prefix_len` directly can land inside a multi-byte char and panic.
pub fn byte_suffix(text: &str, prefix_len: usize) -> &str {
    let mut idx = prefix_len.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    &text[idx..]
}

fn extract_highlights(hit: &Value) -> HashMap<String, Vec<String>> {
    hit.get("highlight")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .map(|(field, frags)| {
                    let fragments = frags
                        .as_array()
                        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .unwrap_or_default();
                    (field.clone(), fragments)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn as_str<'a>(src: &'a Value, key: &str) -> &'a str {
    src.get(key).and_then(Value::as_str).unwrap_or("")
}

fn as_u64(src: &Value, key: &str) -> u64 {
    src.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn as_bool(src: &Value, key: &str) -> bool {
    src.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn as_f64(src: &Value, key: &str) -> f64 {
    src.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Accepts integer-seconds, integer-milliseconds, or RFC3339 timestamps —
/// the three shapes a full-text backend commonly round-trips through JSON.
fn parse_timestamp(src: &Value, key: &str) -> chrono::DateTime<Utc> {
    if let Some(s) = src.get(key).and_then(Value::as_str) {
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
            return dt.with_timezone(&Utc);
        }
    }
    if let Some(n) = src.get(key).and_then(Value::as_i64) {
        let millis = if n > 10_000_000_000 { n } else { n * 1000 };
        if let Some(dt) = chrono::DateTime::from_timestamp_millis(millis) {
            return dt;
        }
    }
    Utc::now()
}

fn index_hint(hit: &Value) -> &'static str {
    let index = hit.get("_index").and_then(Value::as_str).unwrap_or("");
    if index.contains("notes") {
        "notes"
    } else if index.contains("users") {
        "users"
    } else if index.contains("hashtags") {
        "hashtags"
    } else {
        "unknown"
    }
}

fn decode_note_hit(hit: &Value) -> NoteResult {
    let source = hit.get("_source").cloned().unwrap_or(Value::Null);
    let author = source.get("author").cloned().unwrap_or(Value::Null);
    NoteResult {
        note_id: as_str(&hit, "_id").to_string(),
        content: as_str(&source, "text").to_string(),
        author_id: as_str(&source, "user_id").to_string(),
        author_username: as_str(&source, "username").to_string(),
        author_display_name: as_str(&source, "display_name").to_string(),
        author_verified: author.get("verification").and_then(Value::as_str).map(|v| v != "none").unwrap_or(false),
        author_suspended: as_bool(&source, "author_suspended"),
        created_at: parse_timestamp(&source, "created_at"),
        likes: as_u64(source.get("metrics").unwrap_or(&Value::Null), "likes"),
        reposts: as_u64(source.get("metrics").unwrap_or(&Value::Null), "reposts"),
        replies: as_u64(source.get("metrics").unwrap_or(&Value::Null), "replies"),
        views: as_u64(source.get("metrics").unwrap_or(&Value::Null), "views"),
        hashtags: source.get("hashtags").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect()).unwrap_or_default(),
        mentions: source.get("mentions").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect()).unwrap_or_default(),
        nsfw: as_bool(&source, "nsfw"),
        topics: source.get("topics").and_then(Value::as_array).map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect()).unwrap_or_default(),
        sentiment: source.get("sentiment").and_then(|v| serde_json::from_value(v.clone()).ok()),
        relevance_score: hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0),
        highlights: extract_highlights(hit),
    }
}

fn decode_user_hit(hit: &Value) -> UserResult {
    let source = hit.get("_source").cloned().unwrap_or(Value::Null);
    let social = source.get("social").cloned().unwrap_or(Value::Null);
    UserResult {
        user_id: as_str(&hit, "_id").to_string(),
        username: as_str(&source, "username").to_string(),
        display_name: as_str(&source, "display_name").to_string(),
        bio: as_str(&source, "bio").to_string(),
        verified: source.get("verification").and_then(|v| v.get("level")).and_then(Value::as_str).map(|v| v != "none").unwrap_or(false),
        is_suspended: as_str(&source, "status") == "suspended",
        is_deleted: as_str(&source, "status") == "deleted",
        followers: as_u64(&social, "followers"),
        following: as_u64(&social, "following"),
        notes_count: as_u64(&social, "notes_count"),
        engagement_rate: as_f64(&source, "engagement_rate"),
        last_active_at: parse_timestamp(&source, "last_active_at"),
        relevance_score: hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0),
        highlights: extract_highlights(hit),
    }
}

fn decode_hashtag_hit(hit: &Value) -> HashtagResult {
    let source = hit.get("_source").cloned().unwrap_or(Value::Null);
    HashtagResult {
        hashtag: as_str(&source, "hashtag").to_string(),
        total_uses: as_u64(&source, "total_uses"),
        recent_uses_1h: as_u64(&source, "recent_uses_1h"),
        recent_uses_24h: as_u64(&source, "recent_uses_24h"),
        trending_score: as_f64(&source, "trending_score"),
        velocity: as_f64(&source, "velocity"),
    }
}

/// Decodes a raw `_search` response body into a populated `SearchResult`
/// (`aggregations`/`metadata` are left at caller-filled defaults; this
/// function only owns the hit-array decode per spec.md §4.6).
pub fn decode_hits(raw: &Value) -> (Vec<NoteResult>, Vec<UserResult>, Vec<HashtagResult>) {
    let mut notes = Vec::new();
    let mut users = Vec::new();
    let mut hashtags = Vec::new();

    if let Some(hits) = raw.get("hits").and_then(|h| h.get("hits")).and_then(Value::as_array) {
        for hit in hits {
            match index_hint(hit) {
                "notes" => notes.push(decode_note_hit(hit)),
                "users" => users.push(decode_user_hit(hit)),
                "hashtags" => hashtags.push(decode_hashtag_hit(hit)),
                _ => {}
            }
        }
    }

    (notes, users, hashtags)
}

pub fn total_hits(raw: &Value) -> u64 {
    raw.get("hits")
        .and_then(|h| h.get("total"))
        .and_then(|t| t.get("value").or(Some(t)))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

pub fn max_score(raw: &Value) -> f64 {
    raw.get("hits").and_then(|h| h.get("max_score")).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Post-processing per spec.md §4.6: strip content unauthenticated viewers
/// must not see, and suspended/deleted authors/users.
pub fn post_process(mut result: SearchResult, authenticated: bool) -> SearchResult {
    if !authenticated {
        result.notes.retain(|n| !n.nsfw && !n.author_suspended);
    } else {
        result.notes.retain(|n| !n.author_suspended);
    }
    result.users.retain(|u| !u.is_suspended && !u.is_deleted);
    result
}

/// Reorders the `mixed` index vector by each entry's decoded relevance
/// score, descending (spec.md §4.6 "Reorder mixed results").
pub fn reorder_mixed(result: &SearchResult) -> Vec<MixedEntry> {
    let mut entries: Vec<MixedEntry> = result
        .notes
        .iter()
        .enumerate()
        .map(|(i, _)| MixedEntry { kind: MixedResultKind::Note, index: i })
        .chain(result.users.iter().enumerate().map(|(i, _)| MixedEntry { kind: MixedResultKind::User, index: i }))
        .chain(result.hashtags.iter().enumerate().map(|(i, _)| MixedEntry { kind: MixedResultKind::Hashtag, index: i }))
        .collect();

    entries.sort_by(|a, b| {
        let score_a = match a.kind {
            MixedResultKind::Note => result.notes[a.index].relevance_score,
            MixedResultKind::User => result.users[a.index].relevance_score,
            MixedResultKind::Hashtag => result.hashtags[a.index].trending_score,
        };
        let score_b = match b.kind {
            MixedResultKind::Note => result.notes[b.index].relevance_score,
            MixedResultKind::User => result.users[b.index].relevance_score,
            MixedResultKind::Hashtag => result.hashtags[b.index].trending_score,
        };
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });

    entries
}

pub fn suggestions_from_texts(texts: &[(String, u64)], prefix: &str) -> Vec<SuggestionResult> {
    let lower_prefix = prefix.to_lowercase();
    texts
        .iter()
        .filter(|(text, _)| text.to_lowercase().starts_with(&lower_prefix))
        .map(|(text, count)| SuggestionResult {
            suggestion_text: text.clone(),
            completion_text: byte_suffix(text, prefix.len()).to_string(),
            confidence_score: ((*count as f64).ln_1p() / 20.0).min(1.0),
            estimated_results: *count,
        })
        .collect()
}

pub fn empty_aggregations() -> Aggregations {
    Aggregations::default()
}

pub fn build_metadata(query_id: String, took_ms: u64, served_from_cache: bool, total: u64, max_score: f64) -> ResultMetadata {
    ResultMetadata { query_id, took_ms, served_from_cache, total, max_score, applied_corrections: Vec::new(), rewritten_query: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn byte_suffix_does_not_panic_on_a_non_char_boundary() {
        let text = "café";
        assert_eq!(byte_suffix(text, text.len()), "");
        assert_eq!(byte_suffix(text, 3), "é");
        // "é" starts at byte 3 and takes 2 bytes; asking for byte 4 lands inside it.
        assert_eq!(byte_suffix(text, 4), "é");
    }

    fn sample_raw() -> Value {
        json!({
            "hits": {
                "total": { "value": 2 },
                "max_score": 1.5,
                "hits": [
                    {
                        "_index": "notes",
                        "_id": "n1",
                        "_score": 1.5,
                        "_source": {
                            "user_id": "u1", "username": "alice", "display_name": "Alice",
                            "text": "hello world", "created_at": "2026-01-01T00:00:00Z",
                            "metrics": { "likes": 5, "reposts": 1, "replies": 0, "views": 100 },
                            "hashtags": [], "mentions": [], "nsfw": false, "author_suspended": false,
                        }
                    },
                    {
                        "_index": "users-2026",
                        "_id": "u2",
                        "_score": 0.9,
                        "_source": {
                            "username": "bob", "display_name": "Bob", "bio": "",
                            "status": "active", "social": { "followers": 10, "following": 3 },
                            "verification": { "level": "none" },
                        }
                    }
                ]
            }
        })
    }

    #[test]
    fn decodes_notes_and_users_by_index_hint() {
        let (notes, users, hashtags) = decode_hits(&sample_raw());
        assert_eq!(notes.len(), 1);
        assert_eq!(users.len(), 1);
        assert!(hashtags.is_empty());
        assert_eq!(notes[0].note_id, "n1");
        assert_eq!(users[0].username, "bob");
    }

    #[test]
    fn total_and_max_score_read_from_envelope() {
        let raw = sample_raw();
        assert_eq!(total_hits(&raw), 2);
        assert_eq!(max_score(&raw), 1.5);
    }

    #[test]
    fn post_process_strips_nsfw_for_anonymous() {
        let (notes, users, hashtags) = decode_hits(&sample_raw());
        let mut nsfw_note = notes[0].clone();
        nsfw_note.nsfw = true;
        let result = SearchResult {
            notes: vec![nsfw_note],
            users,
            hashtags,
            suggestions: vec![],
            mixed: vec![],
            aggregations: empty_aggregations(),
            metadata: build_metadata("q1".to_string(), 5, false, 1, 1.0),
        };
        let processed = post_process(result, false);
        assert!(processed.notes.is_empty());
    }
}
