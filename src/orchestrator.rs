//! Service Orchestrator (C12). Owns every other component as a singleton,
//! wires them together, and drives the lifecycle the transport shell calls
//! into: `initialize` → `start` → (serve requests) → `stop` (spec.md §4.10).
//!
//! Like the teacher's `build_rocket`, construction is a flat sequence of
//! `Arc::new`s with no cyclic ownership — components reach each other only
//! through the handles this module hands out, never back up into the
//! orchestrator itself (spec.md §9 "opaque-handle architecture").

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{AuthGate, RemoteIdentityValidator};
use crate::backend::{BackendClient, HealthStatus as BackendHealthStatus};
use crate::bus::{spawn_partition_consumer, MessageBus};
use crate::cache::ResponseCache;
use crate::config::{default_tier_table, ServiceConfig};
use crate::controller::SearchController;
use crate::discovery::{start_mdns, MdnsHandle};
use crate::metrics::{ServiceMetrics, SlowQueryLog};
use crate::pipeline::{IndexingPipeline, PipelineMetricsSnapshot};
use crate::rate_limit::{RateLimiter, TierTable};

const METRICS_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Worst-wins aggregate health, ordered so `max()` picks the right answer
/// (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServiceHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

pub struct ComponentHealth {
    pub name: &'static str,
    pub status: ServiceHealth,
    pub detail: Option<String>,
}

/// Reads current process RSS from `/proc/self/status` (Linux only) in MB,
/// the same `/proc` scrape the pack's long-running services use for
/// memory-pressure sampling in place of a platform crate.
fn sample_rss_mb() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let kb: u64 = rest.trim().trim_end_matches("kB").trim_end_matches("KB").trim().parse().ok()?;
                return Some(kb / 1024);
            }
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn pipeline_health(name: &'static str, snapshot: &PipelineMetricsSnapshot, memory_limit_mb: u64, memory_warning_mb: u64, max_queue_size: usize) -> ComponentHealth {
    if snapshot.queue_size >= max_queue_size {
        return ComponentHealth { name, status: ServiceHealth::Unhealthy, detail: Some("queue at capacity".to_string()) };
    }
    if snapshot.memory_usage_mb as u64 >= memory_limit_mb {
        return ComponentHealth { name, status: ServiceHealth::Unhealthy, detail: Some("memory at limit".to_string()) };
    }
    if snapshot.memory_usage_mb as u64 >= memory_warning_mb {
        return ComponentHealth { name, status: ServiceHealth::Degraded, detail: Some("memory above warning threshold".to_string()) };
    }
    ComponentHealth { name, status: ServiceHealth::Healthy, detail: None }
}

/// Holds the singletons named in spec.md §4.10: C1, C4 (×2), C7, C8, C9,
/// C10, C11. The transport shell (`lib.rs`) builds one of these at
/// startup and manages state through it for the life of the process.
pub struct ServiceOrchestrator {
    pub backend: Arc<BackendClient>,
    pub note_pipeline: Arc<IndexingPipeline>,
    pub user_pipeline: Arc<IndexingPipeline>,
    pub cache: Arc<ResponseCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub tier_table: Arc<TierTable>,
    pub auth_gate: Arc<AuthGate<RemoteIdentityValidator>>,
    pub metrics: Arc<ServiceMetrics>,
    pub slow_query_log: Arc<SlowQueryLog>,
    pub controller: Arc<SearchController>,
    pub bus: Arc<MessageBus>,
    pub config: ServiceConfig,
    accepting: AtomicBool,
    cancel: CancellationToken,
}

impl ServiceOrchestrator {
    /// Builds every component and wires them together. Does not start
    /// background workers — that is `start`'s job, split out so a caller
    /// can inspect the assembled orchestrator (e.g. in tests) without
    /// spawning tasks.
    pub fn initialize(config: ServiceConfig) -> Result<Arc<Self>, String> {
        let backend = Arc::new(BackendClient::new(config.backend.clone()).map_err(|e| e.to_string())?);
        let metrics = Arc::new(ServiceMetrics::new());
        let note_pipeline = Arc::new(
            IndexingPipeline::new(config.pipeline_notes.clone(), Arc::clone(&backend), "notes").with_metrics(Arc::clone(&metrics)),
        );
        let user_pipeline = Arc::new(
            IndexingPipeline::new(config.pipeline_users.clone(), Arc::clone(&backend), "users").with_metrics(Arc::clone(&metrics)),
        );
        let cache = Arc::new(ResponseCache::new(config.cache.max_size, config.cache.ttl));
        let rate_limiter = Arc::new(RateLimiter::new());
        let tier_table = Arc::new(TierTable::new(default_tier_table()));
        let auth_gate = Arc::new(AuthGate::new(RemoteIdentityValidator::new(&config.identity)));
        let slow_query_log = Arc::new(SlowQueryLog::new());
        let bus = Arc::new(MessageBus::new());

        let controller = Arc::new(SearchController::new(
            Arc::clone(&backend),
            Arc::clone(&cache),
            Arc::clone(&rate_limiter),
            Arc::clone(&tier_table),
            Arc::clone(&metrics),
            Arc::clone(&slow_query_log),
            config.slow_query_threshold,
        ));

        Ok(Arc::new(Self {
            backend,
            note_pipeline,
            user_pipeline,
            cache,
            rate_limiter,
            tier_table,
            auth_gate,
            metrics,
            slow_query_log,
            controller,
            bus,
            config,
            accepting: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        }))
    }

    /// Spawns every background task: pipeline workers, the bus consumer,
    /// the metrics sampler, the periodic sweeper, and (if enabled) mDNS
    /// registration. Returns the mDNS handle so the caller can keep it
    /// alive for the process lifetime.
    pub async fn start(self: &Arc<Self>, port: u16) -> Option<MdnsHandle> {
        Arc::clone(&self.note_pipeline).spawn_workers(self.cancel.clone());
        Arc::clone(&self.user_pipeline).spawn_workers(self.cancel.clone());

        if self.config.features.real_time_indexing {
            spawn_partition_consumer(self.bus.subscribe(), Arc::clone(&self.note_pipeline), Arc::clone(&self.user_pipeline));
        }

        self.spawn_metrics_sampler();
        self.spawn_sweeper();

        if !self.config.mdns_enabled {
            info!("mDNS service discovery disabled");
            return None;
        }

        let indices: &[&str] = &["notes", "users", "hashtags"];
        match start_mdns(port, &self.config.mdns_instance_name, indices, self.config.features.real_time_indexing) {
            Ok(handle) => {
                info!(fullname = handle.fullname(), %port, "mDNS advertising");
                Some(handle)
            }
            Err(e) => {
                warn!(error = %e, "mDNS failed to start, discovery disabled");
                None
            }
        }
    }

    fn spawn_metrics_sampler(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let cancel = orchestrator.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(METRICS_SAMPLE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                let used_mb = sample_rss_mb().unwrap_or(0);
                orchestrator.note_pipeline.sample_memory(used_mb);
                orchestrator.user_pipeline.sample_memory(used_mb);
                orchestrator.metrics.record_pipeline_snapshot("notes", &orchestrator.note_pipeline.metrics_snapshot());
                orchestrator.metrics.record_pipeline_snapshot("users", &orchestrator.user_pipeline.metrics_snapshot());
            }
        });
    }

    fn spawn_sweeper(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        let cancel = orchestrator.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                orchestrator.rate_limiter.sweep_stale();
                orchestrator.cache.sweep_expired();
            }
        });
    }

    /// Whether the orchestrator is still accepting new requests — route
    /// handlers check this before doing any work so a shutdown in
    /// progress doesn't keep taking on new load (spec.md §4.10 "stop
    /// accepting new requests").
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(AtomicOrdering::Acquire)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queries backend cluster health plus both pipelines' queue/memory
    /// pressure and reduces them with worst-wins (spec.md §4.10).
    pub async fn health(&self) -> (ServiceHealth, Vec<ComponentHealth>) {
        let cancel = CancellationToken::new();
        let backend_health = match self.backend.health_check(&cancel).await {
            Ok(cluster) => match cluster.status {
                BackendHealthStatus::Green => ComponentHealth { name: "backend", status: ServiceHealth::Healthy, detail: None },
                BackendHealthStatus::Yellow => {
                    ComponentHealth { name: "backend", status: ServiceHealth::Degraded, detail: Some("cluster yellow".to_string()) }
                }
                BackendHealthStatus::Red => {
                    ComponentHealth { name: "backend", status: ServiceHealth::Unhealthy, detail: Some("cluster red".to_string()) }
                }
            },
            Err(e) => ComponentHealth { name: "backend", status: ServiceHealth::Critical, detail: Some(e.to_string()) },
        };

        let notes = pipeline_health(
            "note_pipeline",
            &self.note_pipeline.metrics_snapshot(),
            self.config.pipeline_notes.memory_limit_mb,
            self.config.pipeline_notes.memory_warning_mb,
            self.config.pipeline_notes.max_queue_size,
        );
        let users = pipeline_health(
            "user_pipeline",
            &self.user_pipeline.metrics_snapshot(),
            self.config.pipeline_users.memory_limit_mb,
            self.config.pipeline_users.memory_warning_mb,
            self.config.pipeline_users.max_queue_size,
        );

        let components = vec![backend_health, notes, users];
        let worst = components.iter().map(|c| c.status).max().unwrap_or(ServiceHealth::Healthy);
        (worst, components)
    }

    /// Graceful shutdown: stop accepting requests, flush both pipelines
    /// under the configured deadline, then cancel background tasks
    /// (spec.md §4.10 "flip shutdown flag → stop accepting new requests →
    /// flush pipelines under graceful_shutdown_timeout → close C1 →
    /// exit").
    pub async fn stop(&self) {
        self.accepting.store(false, AtomicOrdering::Release);
        self.note_pipeline.shutdown();
        self.user_pipeline.shutdown();

        let deadline = self.config.graceful_shutdown_timeout;
        let cancel = CancellationToken::new();
        tokio::join!(self.note_pipeline.flush_now(&cancel, deadline), self.user_pipeline.flush_now(&cancel, deadline));

        self.cancel.cancel();
        info!("orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn test_config() -> ServiceConfig {
        let mut config = ServiceConfig::from_env();
        config.backend = BackendConfig::from_env();
        config.mdns_enabled = false;
        config
    }

    #[test]
    fn initialize_builds_all_components() {
        let orchestrator = ServiceOrchestrator::initialize(test_config()).expect("initialize");
        assert!(orchestrator.is_accepting());
    }

    #[tokio::test]
    async fn stop_flips_accepting_flag() {
        let orchestrator = ServiceOrchestrator::initialize(test_config()).expect("initialize");
        orchestrator.stop().await;
        assert!(!orchestrator.is_accepting());
    }

    #[test]
    fn worst_wins_ordering_is_correct() {
        assert!(ServiceHealth::Critical > ServiceHealth::Unhealthy);
        assert!(ServiceHealth::Unhealthy > ServiceHealth::Degraded);
        assert!(ServiceHealth::Degraded > ServiceHealth::Healthy);
    }
}
