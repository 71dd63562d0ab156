//! Scorer (C3). Pure formulas over document/metric snapshots — no I/O, no
//! shared state. Every score is clamped to its documented range so callers
//! never have to guard against out-of-band values (spec.md §4.3).

use crate::models::{BoostFactors, EngagementMetrics, UserDocument, VerificationLevel};
use chrono::{DateTime, Utc};

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - created_at).num_seconds().max(0) as f64 / 3_600.0
}

/// Weighted blend of log-dampened engagement rate, log-dampened absolute
/// engagement, and reputation — spec.md §4.3 "Engagement".
pub fn engagement_score(m: &EngagementMetrics, reputation: f64) -> f64 {
    let total = m.likes as f64 + m.reposts as f64 * 2.0 + m.replies as f64 * 1.5;
    let rate = if m.views == 0 { 0.0 } else { total / m.views as f64 };
    let rate_component = (rate * 10.0).ln_1p() / 10.0_f64.ln_1p();
    let absolute_component = total.ln_1p() / 10.0;
    let reputation_component = (reputation / 100.0).min(1.0);

    clamp01(rate_component.min(1.0) * 0.4 + absolute_component.min(1.0) * 0.35 + reputation_component * 0.25)
}

/// `0.5·log(velocity) + 0.3·repost_ratio + 0.2·reach_factor` — spec.md §4.3
/// "Virality". `velocity` is engagements/age_hours with age clamped to ≥1h;
/// `reach_factor` is log(followers)/log(10^6).
pub fn virality_score(m: &EngagementMetrics, followers: u64, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let total = m.likes as f64 + m.reposts as f64 + m.replies as f64;
    if total == 0.0 {
        return 0.0;
    }
    let age = age_hours(created_at, now).max(1.0);
    let velocity = total / age;
    let velocity_component = velocity.ln_1p() / 10.0_f64.ln_1p();

    let repost_ratio = m.reposts as f64 / total;

    let reach_factor = (followers as f64).ln_1p() / 1_000_000.0_f64.ln();

    clamp01(velocity_component.min(1.0) * 0.5 + repost_ratio * 0.3 + reach_factor.clamp(0.0, 1.0) * 0.2)
}

/// `0.4·exp(−age_hours/24) + 0.3·engagement + 0.2·virality + 0.1·hashtag_factor`
/// — spec.md §4.3 "Trending".
pub fn trending_score(
    m: &EngagementMetrics,
    reputation: f64,
    followers: u64,
    hashtag_count: usize,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let recency = (-age_hours(created_at, now) / 24.0).exp();
    let engagement = engagement_score(m, reputation);
    let virality = virality_score(m, followers, created_at, now);
    let hashtag_factor = (hashtag_count as f64 / 5.0).min(1.0);

    clamp01(recency * 0.4 + engagement * 0.3 + virality * 0.2 + hashtag_factor * 0.1)
}

/// Sub-scores for `reputation_score`, each ∈ [0,1] and a pure function of
/// the user's own fields plus *now* (spec.md §4.3 "Reputation (user)").
pub struct ReputationInputs {
    pub notes_count: u64,
    pub likes_received: u64,
    pub likes_given: u64,
    pub followers: u64,
    pub following: u64,
    pub verification: VerificationLevel,
    pub account_age_days: i64,
    pub active_days_last_30: u32,
    pub profile_completeness: f64,
}

/// Weighted sum of content quality (0.25), engagement quality (0.20),
/// network quality (0.15), trust (0.15), influence (0.10), expertise (0.10),
/// activity consistency (0.05); result ∈ [0,100] — spec.md §4.3.
pub fn reputation_score(inputs: &ReputationInputs) -> f64 {
    let content_quality = clamp01(inputs.notes_count as f64 / 500.0);

    let engagement_quality = if inputs.notes_count == 0 {
        0.0
    } else {
        clamp01((inputs.likes_received as f64 / inputs.notes_count as f64).ln_1p() / 5.0)
    };

    let network_quality = if inputs.following == 0 {
        clamp01((inputs.followers as f64).ln_1p() / 15.0)
    } else {
        let ratio = (inputs.followers as f64 / inputs.following as f64).min(10.0) / 10.0;
        clamp01(ratio * 0.6 + ((inputs.followers as f64).ln_1p() / 15.0) * 0.4)
    };

    let trust = match inputs.verification {
        VerificationLevel::None => 0.2,
        VerificationLevel::Email => 0.4,
        VerificationLevel::Phone => 0.6,
        VerificationLevel::Identity => 0.85,
        VerificationLevel::Organization => 1.0,
    };

    let influence = clamp01((inputs.followers as f64).ln_1p() / 20.0_f64.ln_1p());

    let expertise = clamp01(inputs.likes_given as f64 / (inputs.notes_count as f64 + 1.0) / 5.0);

    let activity_consistency = clamp01(inputs.active_days_last_30 as f64 / 30.0) * 0.7
        + clamp01(inputs.profile_completeness) * 0.3;

    let _ = inputs.account_age_days;

    let weighted = content_quality * 0.25
        + engagement_quality * 0.20
        + network_quality * 0.15
        + trust * 0.15
        + influence * 0.10
        + expertise * 0.10
        + activity_consistency * 0.05;

    (weighted * 100.0).clamp(0.0, 100.0)
}

/// Additive from pattern matches on bio/username shape, follower:following
/// skew, posts/day, and profile completeness; clamped to [0,1]. A score
/// ≥0.6 makes `is_bot_likely` true — spec.md §4.3 "Bot likelihood".
pub fn bot_likelihood(
    bio: &str,
    username: &str,
    followers: u64,
    following: u64,
    notes_per_day: f64,
    profile_completeness: f64,
) -> f64 {
    let mut score = 0.0;

    if bio.trim().is_empty() {
        score += 0.1;
    }
    let digit_count = username.chars().filter(|c| c.is_ascii_digit()).count();
    if digit_count >= 4 {
        score += 0.2;
    }

    if following > 500 && followers < 10 {
        score += 0.25;
    } else if following > 0 && followers == 0 {
        score += 0.1;
    }

    if notes_per_day > 50.0 {
        score += 0.25;
    } else if notes_per_day > 20.0 {
        score += 0.1;
    }

    if profile_completeness < 0.3 {
        score += 0.15;
    }

    clamp01(score)
}

pub fn is_bot_likely(score: f64) -> bool {
    score >= 0.6
}

/// Fraction of optional profile fields filled in — bio, avatar, banner,
/// location, website — used as the `profile_completeness` term of both
/// `reputation_score` and `bot_likelihood`.
pub fn profile_completeness(user: &UserDocument) -> f64 {
    let fields = [
        !user.bio.trim().is_empty(),
        user.avatar_url.is_some(),
        user.banner_url.is_some(),
        user.location.is_some(),
        user.website.is_some(),
    ];
    fields.iter().filter(|f| **f).count() as f64 / fields.len() as f64
}

/// Builds `ReputationInputs` from a document snapshot plus *now* — recent
/// activity (`active_days_last_30`) is approximated from `last_active_at`
/// since the document carries no day-by-day activity log, staying a pure
/// function of the document's own fields plus *now* (spec.md §3 invariant).
pub fn reputation_inputs_for(user: &UserDocument, now: DateTime<Utc>) -> ReputationInputs {
    let hours_since_active = (now - user.last_active_at).num_hours().max(0);
    let active_days_last_30 = if hours_since_active <= 24 {
        30
    } else if hours_since_active <= 24 * 7 {
        15
    } else if hours_since_active <= 24 * 30 {
        5
    } else {
        0
    };

    ReputationInputs {
        notes_count: user.social.notes_count,
        likes_received: user.social.likes_received,
        likes_given: user.social.likes_given,
        followers: user.social.followers,
        following: user.social.following,
        verification: user.verification.level,
        account_age_days: (now - user.created_at).num_days().max(0),
        active_days_last_30,
        profile_completeness: profile_completeness(user),
    }
}

/// Log-dampened reach, same curve as `reputation_score`'s internal influence
/// term but exposed standalone for `UserDocument.influence` — spec.md §4.3
/// "Influence", scaled to [0,100] to match `reputation`/`authenticity`.
pub fn influence_score(followers: u64) -> f64 {
    (clamp01((followers as f64).ln_1p() / 20.0_f64.ln_1p()) * 100.0).clamp(0.0, 100.0)
}

/// `(1 − bot_likelihood) × 100`, for `UserDocument.authenticity` — spec.md
/// §4.3 "Bot likelihood" inverted onto the same [0,100] scale as the other
/// user scores.
pub fn authenticity_score(bot_likelihood: f64) -> f64 {
    ((1.0 - clamp01(bot_likelihood)) * 100.0).clamp(0.0, 100.0)
}

/// Combines verification tier, log-dampened follower count, activity,
/// quality, and recency — spec.md §4.3 "Boost factors".
pub fn compute_boosts(
    verification: VerificationLevel,
    followers: u64,
    quality: f64,
    engagement: f64,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> BoostFactors {
    let recency = (1.0 / (1.0 + age_hours(created_at, now) / 24.0)).clamp(0.1, 1.0);

    let verification_boost = match verification {
        VerificationLevel::None => 1.0,
        VerificationLevel::Email => 1.05,
        VerificationLevel::Phone => 1.1,
        VerificationLevel::Identity => 1.25,
        VerificationLevel::Organization => 1.35,
    };

    let follower_boost = 1.0 + ((followers as f64).ln_1p() / 20.0).min(0.5);

    BoostFactors {
        recency: 0.5 + recency * 1.0,
        engagement: 0.5 + engagement * 1.0,
        author: verification_boost * follower_boost / 2.0,
        content_quality: 0.5 + quality * 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EngagementMetrics;

    fn metrics(likes: u64, reposts: u64, replies: u64, views: u64) -> EngagementMetrics {
        EngagementMetrics { likes, reposts, replies, views, ..Default::default() }
    }

    #[test]
    fn engagement_zero_is_zero() {
        assert_eq!(engagement_score(&metrics(0, 0, 0, 0), 0.0), 0.0);
    }

    #[test]
    fn engagement_scales_with_activity_and_reputation() {
        let low = engagement_score(&metrics(5, 1, 2, 1000), 10.0);
        let high = engagement_score(&metrics(500, 200, 100, 1000), 80.0);
        assert!(high > low);
    }

    #[test]
    fn virality_prefers_repost_heavy_content() {
        let now = Utc::now();
        let repost_heavy = virality_score(&metrics(10, 100, 0, 0), 1000, now, now);
        let like_heavy = virality_score(&metrics(100, 10, 0, 0), 1000, now, now);
        assert!(repost_heavy > like_heavy);
    }

    #[test]
    fn trending_decays_with_age() {
        let now = Utc::now();
        let fresh = trending_score(&metrics(100, 50, 20, 1000), 50.0, 1000, 3, now, now);
        let old = trending_score(&metrics(100, 50, 20, 1000), 50.0, 1000, 3, now - chrono::Duration::hours(48), now);
        assert!(fresh > old);
    }

    #[test]
    fn reputation_rewards_verification_and_network() {
        let base = ReputationInputs {
            notes_count: 100,
            likes_received: 500,
            likes_given: 200,
            followers: 1000,
            following: 200,
            verification: VerificationLevel::None,
            account_age_days: 365,
            active_days_last_30: 20,
            profile_completeness: 0.8,
        };
        let verified = ReputationInputs { verification: VerificationLevel::Organization, ..base_clone(&base) };
        assert!(reputation_score(&verified) > reputation_score(&base));
    }

    fn base_clone(i: &ReputationInputs) -> ReputationInputs {
        ReputationInputs {
            notes_count: i.notes_count,
            likes_received: i.likes_received,
            likes_given: i.likes_given,
            followers: i.followers,
            following: i.following,
            verification: i.verification,
            account_age_days: i.account_age_days,
            active_days_last_30: i.active_days_last_30,
            profile_completeness: i.profile_completeness,
        }
    }

    #[test]
    fn bot_likelihood_flags_imbalanced_accounts() {
        let suspicious = bot_likelihood("", "user1234", 2, 3000, 80.0, 0.1);
        let normal = bot_likelihood("hi, I like rust", "alice", 500, 300, 2.0, 0.9);
        assert!(suspicious > normal);
        assert!(is_bot_likely(suspicious));
        assert!(!is_bot_likely(normal));
    }

    #[test]
    fn influence_grows_with_followers() {
        assert!(influence_score(100_000) > influence_score(10));
    }

    #[test]
    fn authenticity_is_inverse_of_bot_likelihood() {
        assert!((authenticity_score(0.0) - 100.0).abs() < 1e-9);
        assert!((authenticity_score(1.0) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn boosts_stay_positive() {
        let now = Utc::now();
        let b = compute_boosts(VerificationLevel::Identity, 10_000, 0.9, 0.8, now, now);
        assert!(b.recency > 0.0 && b.engagement > 0.0 && b.author > 0.0 && b.content_quality > 0.0);
    }
}
