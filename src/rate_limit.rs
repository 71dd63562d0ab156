//! Rate Limiter (C8): per-key token buckets with leaky refill, keyed by
//! authenticated principal id or client IP (spec.md §4.7). Keeps the
//! teacher's `RateLimited<T>`/`RateLimitInfo` Responder wrapper so routes
//! get standard `X-RateLimit-*` headers without repeating header logic.

use crate::config::{RateLimitTier, Tier};
use rocket::http::Header;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

/// Per-key token-bucket table. One instance is shared across all RPCs
/// (spec.md §5 "the response cache is shared across all query RPCs" —
/// the rate limiter follows the same sharing rule).
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { buckets: Mutex::new(HashMap::new()) }
    }

    /// Refill: `tokens = min(burst, tokens + rpm/60000 · ms_since_last_refill)`.
    /// Consumes one token on success.
    pub fn check(&self, key: &str, tier: &RateLimitTier) -> RateLimitInfo {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: tier.burst as f64,
            last_refill: now,
            last_used: now,
        });

        let elapsed_ms = now.duration_since(bucket.last_refill).as_millis() as f64;
        let refill_rate_per_ms = tier.rpm as f64 / 60_000.0;
        bucket.tokens = (bucket.tokens + elapsed_ms * refill_rate_per_ms).min(tier.burst as f64);
        bucket.last_refill = now;
        bucket.last_used = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitInfo {
                allowed: true,
                limit: tier.rpm,
                remaining: bucket.tokens.floor() as u32,
                retry_after_secs: 0,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_ms = deficit / refill_rate_per_ms.max(f64::EPSILON);
            RateLimitInfo {
                allowed: false,
                limit: tier.rpm,
                remaining: 0,
                retry_after_secs: (retry_ms / 1000.0).ceil().max(1.0) as u64,
            }
        }
    }

    /// Drops buckets untouched for over an hour (spec.md §4.7).
    pub fn sweep_stale(&self) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        buckets.retain(|_, b| now.duration_since(b.last_used) < std::time::Duration::from_secs(3_600));
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Static tier table, held separately from the bucket map so a live tier
/// swap doesn't disturb existing buckets (spec.md §4.7 "swapping tiers is
/// live-updatable").
pub struct TierTable {
    tiers: Mutex<HashMap<Tier, RateLimitTier>>,
}

impl TierTable {
    pub fn new(initial: HashMap<Tier, RateLimitTier>) -> Self {
        Self { tiers: Mutex::new(initial) }
    }

    pub fn get(&self, tier: Tier) -> RateLimitTier {
        self.tiers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&tier)
            .cloned()
            .unwrap_or(RateLimitTier { rpm: 30, burst: 10 })
    }

    pub fn set(&self, tier: Tier, value: RateLimitTier) {
        self.tiers.lock().unwrap_or_else(|e| e.into_inner()).insert(tier, value);
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_secs: u64,
}

/// Wrapper that adds standard rate-limit headers to any JSON response.
pub struct RateLimited<T> {
    pub inner: Json<T>,
    pub info: RateLimitInfo,
}

impl<T> RateLimited<T> {
    pub fn new(inner: Json<T>, info: RateLimitInfo) -> Self {
        Self { inner, info }
    }
}

impl<'r, 'o: 'r, T: serde::Serialize + 'o> Responder<'r, 'o> for RateLimited<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let response = Response::build_from(self.inner.respond_to(req)?)
            .header(Header::new("X-RateLimit-Limit", self.info.limit.to_string()))
            .header(Header::new("X-RateLimit-Remaining", self.info.remaining.to_string()))
            .header(Header::new("X-RateLimit-Reset", self.info.retry_after_secs.to_string()))
            .finalize();
        Ok(response)
    }
}

pub struct RateLimitedError {
    pub info: RateLimitInfo,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for RateLimitedError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(serde_json::json!({
            "success": false,
            "error_code": "RATE_LIMIT_EXCEEDED",
            "message": "rate limit exceeded",
            "retry_after_secs": self.info.retry_after_secs,
        }));

        Response::build_from(body.respond_to(req)?)
            .status(rocket::http::Status::TooManyRequests)
            .header(Header::new("X-RateLimit-Limit", self.info.limit.to_string()))
            .header(Header::new("X-RateLimit-Remaining", "0".to_string()))
            .header(Header::new("Retry-After", self.info.retry_after_secs.to_string()))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_burst_then_denies() {
        let limiter = RateLimiter::new();
        let tier = RateLimitTier { rpm: 60, burst: 3 };
        for _ in 0..3 {
            assert!(limiter.check("k", &tier).allowed);
        }
        assert!(!limiter.check("k", &tier).allowed);
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new();
        let tier = RateLimitTier { rpm: 60, burst: 1 };
        assert!(limiter.check("a", &tier).allowed);
        assert!(limiter.check("b", &tier).allowed);
        assert!(!limiter.check("a", &tier).allowed);
    }

    #[test]
    fn tier_table_round_trips() {
        let table = TierTable::new(HashMap::from([(Tier::Standard, RateLimitTier { rpm: 120, burst: 20 })]));
        assert_eq!(table.get(Tier::Standard).rpm, 120);
        table.set(Tier::Standard, RateLimitTier { rpm: 200, burst: 20 });
        assert_eq!(table.get(Tier::Standard).rpm, 200);
    }
}
