//! Prometheus-style metrics registry (spec.md §6 "Metrics emitted"). One
//! `ServiceMetrics` is constructed at orchestrator init and threaded
//! through the controller and both pipelines — the same "precompile once,
//! inject" shape the Design Notes ask for regex patterns (spec.md §9),
//! applied to metric handles instead.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry,
    Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};

pub struct ServiceMetrics {
    pub registry: Registry,

    pub rpc_total: IntCounterVec,
    pub rpc_success: IntCounterVec,
    pub rpc_failed: IntCounterVec,
    pub rpc_rate_limited: IntCounterVec,
    pub rpc_auth_failures: IntCounterVec,
    pub cache_hits: IntCounterVec,
    pub cache_misses: IntCounterVec,
    pub response_time_ms: HistogramVec,

    pub pipeline_processed: IntCounterVec,
    pub pipeline_indexed: IntCounterVec,
    pub pipeline_updated: IntCounterVec,
    pub pipeline_deleted: IntCounterVec,
    pub pipeline_skipped: IntCounterVec,
    pub pipeline_failed: IntCounterVec,
    pub pipeline_retries: IntCounterVec,
    pub pipeline_queue_size: IntGaugeVec,
    pub pipeline_batches_processed: IntCounterVec,
    pub pipeline_batches_failed: IntCounterVec,
    pub pipeline_memory_usage_mb: IntGaugeVec,
    pub pipeline_active_workers: IntGaugeVec,

    /// Per-phase analysis/scoring/submit timings — SPEC_FULL.md §3
    /// supplement mined from the original `IndexingMetrics` phase timers.
    pub phase_duration_ms: HistogramVec,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let rpc_total = register_int_counter_vec_with_registry!("rpc_total", "total RPC calls", &["rpc"], registry).unwrap();
        let rpc_success =
            register_int_counter_vec_with_registry!("rpc_success", "successful RPC calls", &["rpc"], registry).unwrap();
        let rpc_failed = register_int_counter_vec_with_registry!("rpc_failed", "failed RPC calls", &["rpc"], registry).unwrap();
        let rpc_rate_limited =
            register_int_counter_vec_with_registry!("rpc_rate_limited", "rate-limited RPC calls", &["rpc"], registry).unwrap();
        let rpc_auth_failures =
            register_int_counter_vec_with_registry!("rpc_auth_failures", "auth failures", &["rpc"], registry).unwrap();
        let cache_hits = register_int_counter_vec_with_registry!("cache_hits", "response cache hits", &["rpc"], registry).unwrap();
        let cache_misses =
            register_int_counter_vec_with_registry!("cache_misses", "response cache misses", &["rpc"], registry).unwrap();
        let response_time_ms = register_histogram_vec_with_registry!(
            "response_time_ms",
            "RPC response time in milliseconds",
            &["rpc"],
            registry
        )
        .unwrap();

        let pipeline_processed =
            register_int_counter_vec_with_registry!("pipeline_processed", "tasks processed", &["pipeline"], registry).unwrap();
        let pipeline_indexed =
            register_int_counter_vec_with_registry!("pipeline_indexed", "documents indexed", &["pipeline"], registry).unwrap();
        let pipeline_updated =
            register_int_counter_vec_with_registry!("pipeline_updated", "documents updated", &["pipeline"], registry).unwrap();
        let pipeline_deleted =
            register_int_counter_vec_with_registry!("pipeline_deleted", "documents deleted", &["pipeline"], registry).unwrap();
        let pipeline_skipped =
            register_int_counter_vec_with_registry!("pipeline_skipped", "tasks skipped by indexability gate", &["pipeline"], registry)
                .unwrap();
        let pipeline_failed =
            register_int_counter_vec_with_registry!("pipeline_failed", "tasks failed", &["pipeline"], registry).unwrap();
        let pipeline_retries =
            register_int_counter_vec_with_registry!("pipeline_retries", "task retries", &["pipeline"], registry).unwrap();
        let pipeline_queue_size =
            register_int_gauge_vec_with_registry!("pipeline_queue_size", "current queue depth", &["pipeline"], registry).unwrap();
        let pipeline_batches_processed = register_int_counter_vec_with_registry!(
            "pipeline_batches_processed",
            "batches processed",
            &["pipeline"],
            registry
        )
        .unwrap();
        let pipeline_batches_failed =
            register_int_counter_vec_with_registry!("pipeline_batches_failed", "batches with ≥1 failure", &["pipeline"], registry)
                .unwrap();
        let pipeline_memory_usage_mb =
            register_int_gauge_vec_with_registry!("pipeline_memory_usage_mb", "sampled memory usage", &["pipeline"], registry)
                .unwrap();
        let pipeline_active_workers =
            register_int_gauge_vec_with_registry!("pipeline_active_workers", "workers currently draining a batch", &["pipeline"], registry)
                .unwrap();

        let phase_duration_ms = register_histogram_vec_with_registry!(
            "phase_duration_ms",
            "per-phase indexing timing (analyze, score, submit)",
            &["pipeline", "phase"],
            registry
        )
        .unwrap();

        Self {
            registry,
            rpc_total,
            rpc_success,
            rpc_failed,
            rpc_rate_limited,
            rpc_auth_failures,
            cache_hits,
            cache_misses,
            response_time_ms,
            pipeline_processed,
            pipeline_indexed,
            pipeline_updated,
            pipeline_deleted,
            pipeline_skipped,
            pipeline_failed,
            pipeline_retries,
            pipeline_queue_size,
            pipeline_batches_processed,
            pipeline_batches_failed,
            pipeline_memory_usage_mb,
            pipeline_active_workers,
            phase_duration_ms,
        }
    }

    pub fn record_pipeline_snapshot(&self, pipeline: &str, snapshot: &crate::pipeline::PipelineMetricsSnapshot) {
        self.pipeline_queue_size.with_label_values(&[pipeline]).set(snapshot.queue_size as i64);
        self.pipeline_memory_usage_mb.with_label_values(&[pipeline]).set(snapshot.memory_usage_mb);
        self.pipeline_active_workers.with_label_values(&[pipeline]).set(snapshot.active_workers);
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub static SLOW_QUERY_RING_CAP: usize = 100;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SlowQueryEntry {
    pub query: String,
    pub took_ms: u64,
    pub indices: Vec<String>,
    pub hits_total: u64,
}

/// Bounded ring buffer for slow-query logging (spec.md §7).
pub struct SlowQueryLog {
    entries: std::sync::Mutex<std::collections::VecDeque<SlowQueryEntry>>,
}

impl SlowQueryLog {
    pub fn new() -> Self {
        Self { entries: std::sync::Mutex::new(std::collections::VecDeque::with_capacity(SLOW_QUERY_RING_CAP)) }
    }

    pub fn record(&self, entry: SlowQueryEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= SLOW_QUERY_RING_CAP {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<SlowQueryEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }
}

impl Default for SlowQueryLog {
    fn default() -> Self {
        Self::new()
    }
}

pub static GLOBAL_HOSTNAME: Lazy<String> = Lazy::new(|| hostname::get().map(|h| h.to_string_lossy().to_string()).unwrap_or_else(|_| "unknown".to_string()));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_includes_registered_metric_names() {
        let metrics = ServiceMetrics::new();
        metrics.rpc_total.with_label_values(&["search_notes"]).inc();
        let text = metrics.export();
        assert!(text.contains("rpc_total"));
    }

    #[test]
    fn slow_query_log_bounds_capacity() {
        let log = SlowQueryLog::new();
        for i in 0..(SLOW_QUERY_RING_CAP + 10) {
            log.record(SlowQueryEntry { query: format!("q{i}"), took_ms: 10, indices: vec!["notes".to_string()], hits_total: 0 });
        }
        assert_eq!(log.snapshot().len(), SLOW_QUERY_RING_CAP);
    }
}
