//! Content Analyzer (C2). Pure, deterministic, side-effect-free functions
//! over note text — no network I/O, no shared state beyond precompiled
//! regexes. Thresholds below are constants of this component (spec.md §4.2).
//!
//! Regexes are compiled once with `once_cell::sync::Lazy`, per the Design
//! Notes' "precompile regex patterns once ... and inject them" — the same
//! pattern the retrieved pack uses (`mcp_agent_mail_rust`, `drift`) in place
//! of the C++ original's static/global regex handles.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([\p{L}\p{N}_]+)").expect("valid hashtag regex"));
static MENTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").expect("valid mention regex"));
static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[^\s<>\x22]+").expect("valid url regex")
});

const MEDIA_SUFFIXES: &[&str] =
    &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".mp4", ".mov", ".webm"];
const MEDIA_HOSTS: &[&str] =
    &["pic.twitter.com", "i.imgur.com", "imgur.com", "youtube.com", "youtu.be", "vimeo.com"];

static PROMO_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)click here",
        r"(?i)limited time offer",
        r"(?i)buy now",
        r"(?i)act now",
        r"(?i)don't miss out",
        r"(?i)100% free",
        r"(?i)make money fast",
        r"(?i)work from home",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid promo regex"))
    .collect()
});

static SHORTENER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(bit\.ly|tinyurl\.com|t\.co|goo\.gl|ow\.ly)/\S+").expect("valid shortener regex")
});
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\+?\d{1,3}[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b").expect("valid phone regex"));
static MONEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\d+([,.]\d+)?\s*(per|/)\s*(day|hour|week)").expect("valid money regex"));

static NSFW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(nsfw|xxx|onlyfans|porn)\b").expect("valid nsfw regex")
});
static SENSITIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(suicide|self[- ]harm|graphic violence)\b").expect("valid sensitive regex")
});

static CAPS_RATIO_MIN_LEN: usize = 10;

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("technology", &["software", "computer", "ai", "programming", "code", "startup", "app"]),
    ("sports", &["game", "team", "score", "match", "league", "championship", "player"]),
    ("politics", &["election", "senator", "congress", "policy", "vote", "government"]),
    ("entertainment", &["movie", "music", "concert", "album", "celebrity", "show"]),
    ("finance", &["stock", "market", "crypto", "invest", "trading", "economy"]),
];

const POSITIVE_WORDS: &[&str] = &["love", "great", "amazing", "awesome", "happy", "excellent", "wonderful", "good"];
const NEGATIVE_WORDS: &[&str] = &["hate", "terrible", "awful", "sad", "angry", "worst", "bad", "horrible"];

const EN_STOPWORDS: &[&str] = &["the", "and", "is", "in", "to", "of", "for", "with", "on"];
const ES_STOPWORDS: &[&str] = &["el", "la", "los", "las", "que", "para", "con", "por"];
const FR_STOPWORDS: &[&str] = &["le", "la", "les", "des", "est", "pour", "avec", "dans"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone)]
pub struct ContentAnalysis {
    pub hashtags: Vec<String>,
    pub mentions: Vec<String>,
    pub urls: Vec<String>,
    pub media_urls: Vec<String>,
    pub language: String,
    pub quality_score: f64,
    pub spam_score: f64,
    pub nsfw: bool,
    pub sensitive: bool,
    pub topics: Vec<String>,
    pub sentiment: Sentiment,
}

fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|s| seen.insert(s.clone())).collect()
}

pub fn extract_hashtags(text: &str) -> Vec<String> {
    dedup_preserve_order(HASHTAG_RE.captures_iter(text).map(|c| c[1].to_lowercase()).collect())
}

pub fn extract_mentions(text: &str) -> Vec<String> {
    dedup_preserve_order(MENTION_RE.captures_iter(text).map(|c| c[1].to_lowercase()).collect())
}

pub fn extract_urls(text: &str) -> Vec<String> {
    dedup_preserve_order(URL_RE.find_iter(text).map(|m| m.as_str().to_string()).collect())
}

fn is_media_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    if MEDIA_SUFFIXES.iter().any(|suf| lower.split(['?', '#']).next().unwrap_or("").ends_with(suf)) {
        return true;
    }
    MEDIA_HOSTS.iter().any(|host| lower.contains(host))
}

pub fn extract_media_urls(urls: &[String]) -> Vec<String> {
    urls.iter().filter(|u| is_media_url(u)).cloned().collect()
}

/// Unicode-script dominance with a Latin-word stoplist vote as a tiebreaker
/// (spec.md §4.2). Defaults to `en`.
pub fn detect_language(text: &str) -> String {
    let mut cyrillic = 0usize;
    let mut cjk = 0usize;
    let mut arabic = 0usize;
    let mut latin = 0usize;

    for ch in text.chars() {
        let cp = ch as u32;
        if (0x0400..=0x04FF).contains(&cp) {
            cyrillic += 1;
        } else if (0x4E00..=0x9FFF).contains(&cp) || (0x3040..=0x30FF).contains(&cp) {
            cjk += 1;
        } else if (0x0600..=0x06FF).contains(&cp) {
            arabic += 1;
        } else if ch.is_alphabetic() {
            latin += 1;
        }
    }

    if cyrillic > 0 && cyrillic >= cjk && cyrillic >= arabic && cyrillic >= latin {
        return "ru".to_string();
    }
    if cjk > 0 && cjk >= arabic && cjk >= latin {
        return "zh".to_string();
    }
    if arabic > 0 && arabic >= latin {
        return "ar".to_string();
    }

    let lower = text.to_lowercase();
    let words: HashSet<&str> = lower.split_whitespace().collect();
    let es_votes = ES_STOPWORDS.iter().filter(|w| words.contains(*w)).count();
    let fr_votes = FR_STOPWORDS.iter().filter(|w| words.contains(*w)).count();
    let en_votes = EN_STOPWORDS.iter().filter(|w| words.contains(*w)).count();

    if es_votes > en_votes && es_votes > fr_votes {
        "es".to_string()
    } else if fr_votes > en_votes && fr_votes > es_votes {
        "fr".to_string()
    } else {
        "en".to_string()
    }
}

fn caps_ratio(text: &str) -> f64 {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() < CAPS_RATIO_MIN_LEN {
        return 0.0;
    }
    let upper = letters.iter().filter(|c| c.is_uppercase()).count();
    upper as f64 / letters.len() as f64
}

fn punctuation_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let punct = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    punct as f64 / text.chars().count() as f64
}

/// Quality score ∈ [0,1]: base 0.5 plus additive deltas (spec.md §4.2).
pub fn quality_score(text: &str, hashtag_count: usize, url_count: usize) -> f64 {
    let mut score = 0.5;
    let len = text.chars().count();

    if len < 10 {
        score -= 0.3;
    } else if len > 2000 {
        score -= 0.2;
    } else if (20..=280).contains(&len) {
        score += 0.1;
    }

    if text.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
        score += 0.05;
    }

    let caps = caps_ratio(text);
    if caps > 0.5 {
        score -= 0.2;
    }

    let punct = punctuation_ratio(text);
    if punct > 0.3 {
        score -= 0.15;
    }

    if url_count == 1 {
        score += 0.1;
    } else if url_count > 3 {
        score -= 0.2;
    }

    if hashtag_count > 10 {
        score -= 0.3;
    } else if hashtag_count > 5 {
        score -= 0.15;
    }

    score.clamp(0.0, 1.0)
}

/// Spam score: additive matches against fixed patterns plus URL count and
/// caps ratio (spec.md §4.2).
pub fn spam_score(text: &str, url_count: usize) -> f64 {
    let mut score = 0.0;

    for pattern in PROMO_PATTERNS.iter() {
        if pattern.is_match(text) {
            score += 0.2;
        }
    }
    if SHORTENER_RE.is_match(text) {
        score += 0.15;
    }
    if PHONE_RE.is_match(text) {
        score += 0.15;
    }
    if MONEY_RE.is_match(text) {
        score += 0.2;
    }

    if url_count > 3 {
        score += 0.2;
    }
    if caps_ratio(text) > 0.5 {
        score += 0.15;
    }

    score.clamp(0.0, 1.0)
}

pub fn is_nsfw(text: &str) -> bool {
    NSFW_RE.is_match(text)
}

pub fn is_sensitive(text: &str) -> bool {
    SENSITIVE_RE.is_match(text)
}

/// A topic is emitted when at least two of its keywords appear (spec.md §4.2).
pub fn extract_topics(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOPIC_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().filter(|k| lower.contains(*k)).count() >= 2)
        .map(|(topic, _)| topic.to_string())
        .collect()
}

pub fn sentiment(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let pos = words.iter().filter(|w| POSITIVE_WORDS.contains(w)).count();
    let neg = words.iter().filter(|w| NEGATIVE_WORDS.contains(w)).count();
    match pos.cmp(&neg) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

/// Run the full analysis pipeline over raw note text.
pub fn analyze(text: &str) -> ContentAnalysis {
    let hashtags = extract_hashtags(text);
    let mentions = extract_mentions(text);
    let urls = extract_urls(text);
    let media_urls = extract_media_urls(&urls);

    ContentAnalysis {
        quality_score: quality_score(text, hashtags.len(), urls.len()),
        spam_score: spam_score(text, urls.len()),
        nsfw: is_nsfw(text),
        sensitive: is_sensitive(text),
        topics: extract_topics(text),
        sentiment: sentiment(text),
        language: detect_language(text),
        hashtags,
        mentions,
        urls,
        media_urls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashtags_and_mentions_are_lowercased_and_deduped() {
        let a = analyze("Hello #Rust #rust @Alice @alice world");
        assert_eq!(a.hashtags, vec!["rust".to_string()]);
        assert_eq!(a.mentions, vec!["alice".to_string()]);
    }

    #[test]
    fn media_url_detected_by_suffix_and_host() {
        let urls = vec![
            "https://example.com/photo.jpg".to_string(),
            "https://example.com/page".to_string(),
            "https://i.imgur.com/abc".to_string(),
        ];
        let media = extract_media_urls(&urls);
        assert_eq!(media.len(), 2);
    }

    #[test]
    fn language_detects_cyrillic() {
        assert_eq!(detect_language("Привет мир, это русский текст"), "ru");
    }

    #[test]
    fn language_defaults_to_en() {
        assert_eq!(detect_language("gdkgjk random nonwords zzz"), "en");
    }

    #[test]
    fn spam_score_flags_promo_phrases() {
        let s = spam_score("Click here for a limited time offer! Buy now!!!", 0);
        assert!(s > 0.3);
    }

    #[test]
    fn quality_score_penalizes_short_and_long_text() {
        let short = quality_score("hi", 0, 0);
        let long = quality_score(&"a ".repeat(1200), 0, 0);
        let normal = quality_score("This is a perfectly reasonable note about something interesting.", 1, 1);
        assert!(short < normal);
        assert!(long < normal);
    }

    #[test]
    fn topics_require_two_keyword_matches() {
        assert!(extract_topics("I love this new software startup and its AI").contains(&"technology".to_string()));
        assert!(extract_topics("I wrote some code today").is_empty());
    }

    #[test]
    fn nsfw_and_sensitive_flags() {
        assert!(is_nsfw("this is NSFW content"));
        assert!(is_sensitive("discussing self-harm prevention"));
        assert!(!is_nsfw("a perfectly normal note"));
    }

    #[test]
    fn sentiment_voting() {
        assert_eq!(sentiment("I love this, it's amazing and great"), Sentiment::Positive);
        assert_eq!(sentiment("this is terrible and awful"), Sentiment::Negative);
        assert_eq!(sentiment("the weather today"), Sentiment::Neutral);
    }
}
