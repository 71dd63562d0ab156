//! Integration coverage for the Rate Limiter (C8), exercised against the
//! default per-tier table a deployed service would actually use instead of
//! hand-built tiers.

use sonet_search_service::config::{default_tier_table, Tier};
use sonet_search_service::rate_limit::{RateLimiter, TierTable};

#[test]
fn anonymous_tier_is_stricter_than_verified() {
    let table = TierTable::new(default_tier_table());
    let anon = table.get(Tier::Anonymous);
    let verified = table.get(Tier::Verified);
    assert!(verified.rpm > anon.rpm);
    assert!(verified.burst > anon.burst);
}

#[test]
fn each_tier_can_exhaust_its_own_burst_independently() {
    let limiter = RateLimiter::new();
    let table = TierTable::new(default_tier_table());
    let anon_tier = table.get(Tier::Anonymous);

    for _ in 0..anon_tier.burst {
        assert!(limiter.check("client-a", &anon_tier).allowed);
    }
    assert!(!limiter.check("client-a", &anon_tier).allowed);

    // A different key under the same tier starts with a fresh bucket.
    assert!(limiter.check("client-b", &anon_tier).allowed);
}

#[test]
fn sweep_stale_does_not_touch_recently_used_buckets() {
    let limiter = RateLimiter::new();
    let table = TierTable::new(default_tier_table());
    let tier = table.get(Tier::Standard);
    limiter.check("fresh", &tier);
    limiter.sweep_stale();
    assert_eq!(limiter.bucket_count(), 1);
}

#[test]
fn live_tier_update_is_observed_by_subsequent_checks() {
    let table = TierTable::new(default_tier_table());
    let limiter = RateLimiter::new();
    table.set(Tier::Anonymous, sonet_search_service::config::RateLimitTier { rpm: 6000, burst: 1 });
    let tightened = table.get(Tier::Anonymous);
    assert!(limiter.check("k", &tightened).allowed);
    assert!(!limiter.check("k", &tightened).allowed);
}
