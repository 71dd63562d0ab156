//! Process configuration, read from environment variables with sensible
//! defaults — the same `env::var(...).ok().and_then(parse)` style the
//! teacher's `RateLimitConfig::from_env` uses, generalized across every key
//! in spec.md §6.

use std::env;
use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub hosts: Vec<String>,
    pub use_tls: bool,
    pub verify_tls: bool,
    pub request_timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub max_connections_per_host: usize,
    pub bulk_batch_size: usize,
    pub bulk_flush_interval: Duration,
    pub auth: BackendAuth,
}

#[derive(Debug, Clone)]
pub enum BackendAuth {
    None,
    Basic { username: String, password: String },
    ApiKey(String),
}

impl BackendConfig {
    pub fn from_env() -> Self {
        let hosts = env::var("BACKEND_HOSTS")
            .unwrap_or_else(|_| "http://127.0.0.1:9200".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let auth = if let Ok(key) = env::var("BACKEND_API_KEY") {
            BackendAuth::ApiKey(key)
        } else if let (Ok(u), Ok(p)) = (env::var("BACKEND_USERNAME"), env::var("BACKEND_PASSWORD")) {
            BackendAuth::Basic { username: u, password: p }
        } else {
            BackendAuth::None
        };

        Self {
            hosts,
            use_tls: env_bool("BACKEND_USE_TLS", false),
            verify_tls: env_bool("BACKEND_VERIFY_TLS", true),
            request_timeout: Duration::from_millis(env_parse("BACKEND_REQUEST_TIMEOUT_MS", 5_000)),
            connection_timeout: Duration::from_millis(env_parse("BACKEND_CONNECTION_TIMEOUT_MS", 2_000)),
            max_connections: env_parse("BACKEND_MAX_CONNECTIONS", 100),
            max_connections_per_host: env_parse("BACKEND_MAX_CONNECTIONS_PER_HOST", 20),
            bulk_batch_size: env_parse("BACKEND_BULK_BATCH_SIZE", 500),
            bulk_flush_interval: Duration::from_millis(env_parse("BACKEND_BULK_FLUSH_INTERVAL_MS", 1_000)),
            auth,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_queue_size: usize,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub memory_limit_mb: u64,
    pub memory_warning_mb: u64,
    pub index_spam: bool,
    pub index_nsfw: bool,
    pub index_bots: bool,
    pub worker_count: usize,
}

impl PipelineConfig {
    pub fn notes_from_env() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            batch_size: env_parse("PIPELINE_NOTES_BATCH_SIZE", 200),
            batch_timeout: Duration::from_millis(env_parse("PIPELINE_NOTES_BATCH_TIMEOUT_MS", 250)),
            max_queue_size: env_parse("PIPELINE_NOTES_MAX_QUEUE_SIZE", 50_000),
            max_retry_attempts: env_parse("PIPELINE_NOTES_MAX_RETRY_ATTEMPTS", 3),
            retry_delay: Duration::from_millis(env_parse("PIPELINE_NOTES_RETRY_DELAY_MS", 1_000)),
            memory_limit_mb: env_parse("PIPELINE_NOTES_MEMORY_LIMIT_MB", 1_000),
            memory_warning_mb: env_parse("PIPELINE_NOTES_MEMORY_WARNING_MB", 500),
            index_spam: env_bool("PIPELINE_NOTES_INDEX_SPAM", false),
            index_nsfw: env_bool("PIPELINE_NOTES_INDEX_NSFW", true),
            index_bots: true,
            worker_count: (workers / 2).max(1),
        }
    }

    pub fn users_from_env() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            batch_size: env_parse("PIPELINE_USERS_BATCH_SIZE", 200),
            batch_timeout: Duration::from_millis(env_parse("PIPELINE_USERS_BATCH_TIMEOUT_MS", 250)),
            max_queue_size: env_parse("PIPELINE_USERS_MAX_QUEUE_SIZE", 50_000),
            max_retry_attempts: env_parse("PIPELINE_USERS_MAX_RETRY_ATTEMPTS", 3),
            retry_delay: Duration::from_millis(env_parse("PIPELINE_USERS_RETRY_DELAY_MS", 1_000)),
            memory_limit_mb: env_parse("PIPELINE_USERS_MEMORY_LIMIT_MB", 1_000),
            memory_warning_mb: env_parse("PIPELINE_USERS_MEMORY_WARNING_MB", 500),
            index_spam: false,
            index_nsfw: true,
            index_bots: env_bool("PIPELINE_USERS_INDEX_BOTS", false),
            worker_count: (workers / 4).max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl: Duration,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("CACHE_ENABLED", true),
            max_size: env_parse("CACHE_MAX_SIZE", 10_000),
            ttl: Duration::from_secs(env_parse::<u64>("CACHE_TTL_MINUTES", 5) * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitTier {
    pub rpm: u32,
    pub burst: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub default_rpm: u32,
    pub default_burst: u32,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool("RATE_LIMIT_ENABLED", true),
            default_rpm: env_parse("RATE_LIMIT_RPM", 120),
            default_burst: env_parse("RATE_LIMIT_BURST", 20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Anonymous,
    Standard,
    Verified,
    Internal,
}

/// Static `(rpm, burst)` table, live-updatable only by process restart in
/// this implementation — per spec.md §4.7 "swapping tiers is live-updatable"
/// the table itself is a plain `HashMap` a caller can mutate at runtime.
pub fn default_tier_table() -> std::collections::HashMap<Tier, RateLimitTier> {
    use Tier::*;
    std::collections::HashMap::from([
        (Anonymous, RateLimitTier { rpm: 30, burst: 10 }),
        (Standard, RateLimitTier { rpm: 120, burst: 20 }),
        (Verified, RateLimitTier { rpm: 300, burst: 50 }),
        (Internal, RateLimitTier { rpm: 3000, burst: 200 }),
    ])
}

/// Connection details for the external identity service Auth Gate
/// delegates to (spec.md §4.8, "opaque to this spec"). An empty `base_url`
/// means no identity service is configured and every token falls back to
/// anonymous, which is the sane default for a standalone deployment.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl IdentityConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("IDENTITY_SERVICE_URL", ""),
            request_timeout: Duration::from_millis(env_parse("IDENTITY_SERVICE_TIMEOUT_MS", 2_000)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureFlags {
    pub real_time_indexing: bool,
    pub trending: bool,
    pub personalization: bool,
}

impl FeatureFlags {
    pub fn from_env() -> Self {
        Self {
            real_time_indexing: env_bool("FEATURES_REAL_TIME_INDEXING", true),
            trending: env_bool("FEATURES_TRENDING", true),
            personalization: env_bool("FEATURES_PERSONALIZATION", true),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub backend: BackendConfig,
    pub pipeline_notes: PipelineConfig,
    pub pipeline_users: PipelineConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub identity: IdentityConfig,
    pub features: FeatureFlags,
    pub slow_query_threshold: Duration,
    pub log_level: String,
    pub log_format: String,
    pub graceful_shutdown_timeout: Duration,
    pub mdns_enabled: bool,
    pub mdns_instance_name: String,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self {
            backend: BackendConfig::from_env(),
            pipeline_notes: PipelineConfig::notes_from_env(),
            pipeline_users: PipelineConfig::users_from_env(),
            cache: CacheConfig::from_env(),
            rate_limit: RateLimitConfig::from_env(),
            identity: IdentityConfig::from_env(),
            features: FeatureFlags::from_env(),
            slow_query_threshold: Duration::from_millis(env_parse("SLOW_QUERY_THRESHOLD_MS", 500)),
            log_level: env_string("LOG_LEVEL", "info"),
            log_format: env_string("LOG_FORMAT", "json"),
            graceful_shutdown_timeout: Duration::from_millis(env_parse("GRACEFUL_SHUTDOWN_TIMEOUT_MS", 10_000)),
            mdns_enabled: env_bool("MDNS_ENABLED", true),
            mdns_instance_name: env_string("MDNS_INSTANCE_NAME", "sonet-search"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_defaults_are_sane() {
        let cfg = PipelineConfig::notes_from_env();
        assert!(cfg.batch_size > 0);
        assert!(cfg.memory_warning_mb < cfg.memory_limit_mb);
        assert!(cfg.worker_count >= 1);
    }

    #[test]
    fn tier_table_has_all_tiers() {
        let table = default_tier_table();
        assert_eq!(table.len(), 4);
        assert!(table[&Tier::Verified].rpm > table[&Tier::Standard].rpm);
    }
}
