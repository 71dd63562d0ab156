//! Indexing Pipeline (C4) — the center of the core. One instance per
//! document type (notes, users); both are symmetric over `IndexableDocument`
//! so a single implementation serves both, configured by a distinct
//! `PipelineConfig` and backend index name per instance (spec.md §4.4).
//!
//! The priority queue is a `BTreeSet` ordered `(priority desc, scheduled_at
//! asc)` with a side `HashMap` for id-keyed duplicate collapsing — the
//! `BinaryHeap` the teacher might reach for doesn't support the removal
//! dedup needs, so a `BTreeSet` (with `pop_first`) stands in instead.

use crate::backend::{BackendClient, BulkOp};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::{IndexOp, IndexableDocument, IndexingTask, NoteDocument, UserDocument};
use crate::{analyzer, scorer};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Emitted on every successful submit to the backend — fans out over the
/// `/stream` SSE route (SPEC_FULL.md §2) the same way the teacher's
/// `EventBus` fans out `ChatEvent::NewMessage`. Purely observational; no
/// component depends on receiving one.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexEvent {
    pub index: String,
    pub id: String,
    pub op: IndexOp,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FailedOp {
    pub task_id: String,
    pub op: IndexOp,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub processed: AtomicU64,
    pub indexed: AtomicU64,
    pub updated: AtomicU64,
    pub deleted: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
    pub retries: AtomicU64,
    pub batches_processed: AtomicU64,
    pub batches_failed: AtomicU64,
    pub memory_usage_mb: AtomicI64,
    pub active_workers: AtomicI64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineMetricsSnapshot {
    pub processed: u64,
    pub indexed: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub retries: u64,
    pub queue_size: usize,
    pub batches_processed: u64,
    pub batches_failed: u64,
    pub memory_usage_mb: i64,
    pub active_workers: i64,
}

#[derive(Clone)]
struct QueueEntry {
    priority: i32,
    scheduled_at: DateTime<Utc>,
    seq: u64,
    task: IndexingTask,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.scheduled_at == other.scheduled_at && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.scheduled_at.cmp(&other.scheduled_at))
            .then(self.seq.cmp(&other.seq))
    }
}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct PipelineQueue {
    ordered: std::collections::BTreeSet<QueueEntry>,
    by_id: HashMap<String, QueueEntry>,
}

impl PipelineQueue {
    fn new() -> Self {
        Self { ordered: std::collections::BTreeSet::new(), by_id: HashMap::new() }
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Collapses duplicate ids by keeping whichever entry has the higher
    /// `scheduled_at` — a later `delete` always wins over an earlier
    /// `create`/`update`, and a later `create` wins back over an earlier
    /// `delete`, matching both rules in spec.md §4.4/§8.
    fn push(&mut self, entry: QueueEntry) {
        let id = entry.task.id().to_string();
        if let Some(existing) = self.by_id.get(&id) {
            if entry.scheduled_at < existing.scheduled_at {
                return;
            }
            let stale = existing.clone();
            self.ordered.remove(&stale);
        }
        self.by_id.insert(id, entry.clone());
        self.ordered.insert(entry);
    }

    fn pop_ready(&mut self, now: DateTime<Utc>, max: usize) -> Vec<IndexingTask> {
        let mut popped = Vec::new();
        let mut deferred = Vec::new();

        while popped.len() < max {
            let Some(candidate) = self.ordered.iter().next().cloned() else { break };
            self.ordered.remove(&candidate);
            if candidate.scheduled_at > now {
                deferred.push(candidate);
                continue;
            }
            self.by_id.remove(candidate.task.id());
            popped.push(candidate.task.clone());
        }

        for entry in deferred {
            self.ordered.insert(entry);
        }

        popped
    }
}

/// Priority scoring for a note task — additive, clamped (spec.md §4.4).
pub fn note_priority(doc: &NoteDocument, now: DateTime<Utc>) -> i32 {
    let mut p = 0;
    if !matches!(doc.author.verification, crate::models::VerificationLevel::None) {
        p += 10;
    }
    if doc.metrics.engagement_score >= 0.7 {
        p += 5;
    }
    if doc.metrics.virality_score >= 0.8 {
        p += 8;
    }
    if (now - doc.created_at).num_minutes() < 10 {
        p += 3;
    }
    if !doc.hashtags.is_empty() {
        p += 2;
    }
    p.clamp(0, 100)
}

/// Priority scoring for a user task — additive, clamped (spec.md §4.4):
/// +15 official-verified individual (`Identity`), +10 organization, +5
/// other verified (`Phone`/`Email`).
pub fn user_priority(doc: &UserDocument, now: DateTime<Utc>) -> i32 {
    use crate::models::VerificationLevel::*;
    let mut p = match doc.verification.level {
        Identity => 15,
        Organization => 10,
        Phone | Email => 5,
        None => 0,
    };
    // `reputation` is stored on a [0,100] scale (spec.md §8); the 0.8
    // threshold here mirrors the note-priority rules' [0,1]-scale checks.
    if doc.reputation.unwrap_or(0.0) / 100.0 >= 0.8 {
        p += 8;
    }
    if doc.social.followers >= 10_000 {
        p += 5;
    }
    if (now - doc.updated_at).num_hours() < 1 {
        p += 3;
    }
    p.clamp(0, 100)
}

pub struct IndexingPipeline {
    config: PipelineConfig,
    backend: Arc<BackendClient>,
    index_name: String,
    queue: Mutex<PipelineQueue>,
    seq_counter: AtomicU64,
    metrics: PipelineMetrics,
    paused: AtomicBool,
    shutdown: AtomicBool,
    memory_pressure: AtomicBool,
    not_empty: Notify,
    failed_ops: Mutex<VecDeque<FailedOp>>,
    events: broadcast::Sender<IndexEvent>,
    service_metrics: Option<Arc<crate::metrics::ServiceMetrics>>,
}

const FAILED_OPS_CAP: usize = 1000;
const BASE_RETRY_DELAY_SECS: i64 = 1;

impl IndexingPipeline {
    pub fn new(config: PipelineConfig, backend: Arc<BackendClient>, index_name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            config,
            backend,
            index_name: index_name.into(),
            queue: Mutex::new(PipelineQueue::new()),
            seq_counter: AtomicU64::new(0),
            metrics: PipelineMetrics::default(),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            memory_pressure: AtomicBool::new(false),
            not_empty: Notify::new(),
            failed_ops: Mutex::new(VecDeque::with_capacity(FAILED_OPS_CAP)),
            events,
            service_metrics: None,
        }
    }

    /// Attaches the process-wide metrics registry so `run_batch` can record
    /// per-phase timings into `phase_duration_ms` (SPEC_FULL.md §3). Optional
    /// because unit tests construct pipelines without a registry at hand.
    pub fn with_metrics(mut self, metrics: Arc<crate::metrics::ServiceMetrics>) -> Self {
        self.service_metrics = Some(metrics);
        self
    }

    /// Subscribes to completion events for this pipeline's submissions —
    /// used by the `/stream` SSE route, not by any internal component.
    pub fn subscribe_events(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    fn observe_phase(&self, phase: &str, elapsed: std::time::Duration) {
        if let Some(metrics) = &self.service_metrics {
            metrics.phase_duration_ms.with_label_values(&[self.index_name.as_str(), phase]).observe(elapsed.as_secs_f64() * 1000.0);
        }
    }

    /// Non-blocking enqueue; rejects when the queue is full or under
    /// critical memory pressure (spec.md §4.4 "Enqueue").
    pub fn enqueue(&self, mut task: IndexingTask) -> bool {
        if self.shutdown.load(AtomicOrdering::Acquire) {
            return false;
        }
        if self.memory_pressure.load(AtomicOrdering::Acquire) {
            return false;
        }

        if !self.gate(&task.document) {
            self.metrics.skipped.fetch_add(1, AtomicOrdering::Relaxed);
            return false;
        }

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= self.config.max_queue_size && !queue.by_id.contains_key(task.id()) {
            return false;
        }

        task.enqueued_at = Utc::now();
        let seq = self.seq_counter.fetch_add(1, AtomicOrdering::Relaxed);
        queue.push(QueueEntry { priority: task.priority, scheduled_at: task.scheduled_at, seq, task });
        drop(queue);
        self.not_empty.notify_one();
        true
    }

    /// Synchronous bypass: same analysis+score+submit path, no queue
    /// (spec.md §4.4 "IndexNow").
    pub async fn index_now(&self, document: IndexableDocument, cancel: &CancellationToken) -> Result<(), PipelineError> {
        if !self.gate(&document) {
            return Err(PipelineError::NotIndexable);
        }
        self.submit(&document, IndexOp::Create, cancel).await
    }

    fn gate(&self, document: &IndexableDocument) -> bool {
        match document {
            IndexableDocument::Note(n) => n.should_be_indexed(self.config.index_spam, self.config.index_nsfw, self.config.index_bots),
            IndexableDocument::User(u) => u.should_be_indexed(self.config.index_bots),
        }
    }

    fn document_to_json(&self, document: &IndexableDocument) -> Value {
        match document {
            IndexableDocument::Note(n) => serde_json::to_value(n.as_ref()).unwrap_or(Value::Null),
            IndexableDocument::User(u) => serde_json::to_value(u.as_ref()).unwrap_or(Value::Null),
        }
    }

    /// Runs content analysis/scoring if the document needs (re)analysis,
    /// then submits to the backend (spec.md §4.4 worker loop step 3).
    fn analyze_and_score(&self, document: &mut IndexableDocument) {
        let now = Utc::now();
        match document {
            IndexableDocument::Note(note) => {
                if note.quality_score.is_none() {
                    let analysis = analyzer::analyze(&note.text);
                    note.hashtags = analysis.hashtags;
                    note.mentions = analysis.mentions;
                    note.media_urls = analysis.media_urls;
                    note.language = analysis.language;
                    note.quality_score = Some(analysis.quality_score);
                    note.spam_score = Some(analysis.spam_score);
                    note.nsfw = note.nsfw || analysis.nsfw;
                    note.sensitive = note.sensitive || analysis.sensitive;
                    note.topics = analysis.topics;
                    note.sentiment = Some(analysis.sentiment);
                }
                note.metrics.engagement_score = scorer::engagement_score(&note.metrics, note.author.reputation);
                note.metrics.virality_score =
                    scorer::virality_score(&note.metrics, note.author.followers, note.created_at, now);
                note.metrics.trending_score = scorer::trending_score(
                    &note.metrics,
                    note.author.reputation,
                    note.author.followers,
                    note.hashtags.len(),
                    note.created_at,
                    now,
                );
                note.boosts = scorer::compute_boosts(
                    note.author.verification,
                    note.author.followers,
                    note.quality_score.unwrap_or(0.5),
                    note.metrics.engagement_score,
                    note.created_at,
                    now,
                );
            }
            IndexableDocument::User(user) => {
                let inputs = scorer::reputation_inputs_for(user, now);
                let account_age_days = (now - user.created_at).num_days().max(1) as f64;
                let notes_per_day = user.social.notes_count as f64 / account_age_days;
                let bot_score = scorer::bot_likelihood(
                    &user.bio,
                    &user.username,
                    user.social.followers,
                    user.social.following,
                    notes_per_day,
                    inputs.profile_completeness,
                );

                let reputation = scorer::reputation_score(&inputs);
                user.influence = Some(scorer::influence_score(user.social.followers));
                user.authenticity = Some(scorer::authenticity_score(bot_score));
                user.reputation = Some(reputation);

                user.boosts = scorer::compute_boosts(
                    user.verification.level,
                    user.social.followers,
                    inputs.profile_completeness,
                    reputation / 100.0,
                    user.created_at,
                    now,
                );
            }
        }
    }

    async fn submit(&self, document: &IndexableDocument, op: IndexOp, cancel: &CancellationToken) -> Result<(), PipelineError> {
        let id = document.id().to_string();
        let doc_json = self.document_to_json(document);

        let result = match op {
            IndexOp::Delete => self.backend.delete_doc(cancel, &self.index_name, &id).await,
            IndexOp::UpdateMetrics | IndexOp::Update => {
                self.backend.update_doc(cancel, &self.index_name, &id, doc_json).await
            }
            IndexOp::Create => self.backend.index_doc(cancel, &self.index_name, &id, doc_json).await.map(|_| ()),
        };

        result.map_err(PipelineError::from)
    }

    /// Drains one batch immediately, running the full worker-loop body
    /// synchronously; used both by the background worker and `flush_now`.
    async fn run_batch(&self, cancel: &CancellationToken) -> usize {
        let now = Utc::now();
        let mut tasks = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.pop_ready(now, self.config.batch_size)
        };

        let count = tasks.len();
        if count == 0 {
            return 0;
        }

        self.metrics.active_workers.fetch_add(1, AtomicOrdering::Relaxed);
        let mut batch_failed = false;

        for task in tasks.iter_mut() {
            if cancel.is_cancelled() {
                break;
            }
            self.metrics.processed.fetch_add(1, AtomicOrdering::Relaxed);

            let mut document = task.document.clone();
            let analyze_started = std::time::Instant::now();
            self.analyze_and_score(&mut document);
            self.observe_phase("analyze", analyze_started.elapsed());

            if !self.gate(&document) {
                self.metrics.skipped.fetch_add(1, AtomicOrdering::Relaxed);
                continue;
            }

            let submit_started = std::time::Instant::now();
            let submit_result = self.submit(&document, task.op, cancel).await;
            self.observe_phase("submit", submit_started.elapsed());

            match submit_result {
                Ok(()) => {
                    match task.op {
                        IndexOp::Create => {
                            self.metrics.indexed.fetch_add(1, AtomicOrdering::Relaxed);
                        }
                        IndexOp::Delete => {
                            self.metrics.deleted.fetch_add(1, AtomicOrdering::Relaxed);
                        }
                        IndexOp::Update | IndexOp::UpdateMetrics => {
                            self.metrics.updated.fetch_add(1, AtomicOrdering::Relaxed);
                        }
                    }
                    let _ = self.events.send(IndexEvent {
                        index: self.index_name.clone(),
                        id: document.id().to_string(),
                        op: task.op,
                        at: Utc::now(),
                    });
                }
                Err(PipelineError::Backend(e)) if e.code == "CANCELLED" => {
                    // deadline-cancelled, not a backend failure: no retry.
                }
                Err(e) => {
                    batch_failed = true;
                    self.handle_failure(task.clone(), e.to_string());
                }
            }
        }

        self.metrics.active_workers.fetch_sub(1, AtomicOrdering::Relaxed);
        self.metrics.batches_processed.fetch_add(1, AtomicOrdering::Relaxed);
        if batch_failed {
            self.metrics.batches_failed.fetch_add(1, AtomicOrdering::Relaxed);
        }

        count
    }

    /// On failure: retry with exponential backoff + jitter, or drop to the
    /// failed-ops ring once `max_retry_attempts` is exceeded (spec.md §4.4
    /// step 5, §7).
    fn handle_failure(&self, mut task: IndexingTask, message: String) {
        self.metrics.failed.fetch_add(1, AtomicOrdering::Relaxed);

        if task.retry_count < self.config.max_retry_attempts {
            task.retry_count += 1;
            self.metrics.retries.fetch_add(1, AtomicOrdering::Relaxed);

            let jitter = rand::thread_rng().gen_range(0.75..1.25);
            let backoff_secs = BASE_RETRY_DELAY_SECS as f64 * 2f64.powi(task.retry_count as i32) * jitter;
            task.scheduled_at = Utc::now() + chrono::Duration::milliseconds((backoff_secs * 1000.0) as i64);

            let seq = self.seq_counter.fetch_add(1, AtomicOrdering::Relaxed);
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.push(QueueEntry { priority: task.priority, scheduled_at: task.scheduled_at, seq, task });
        } else {
            warn!(task_id = task.id(), message = %message, "task exhausted retries, moving to failed-ops ring");
            let mut ring = self.failed_ops.lock().unwrap_or_else(|e| e.into_inner());
            if ring.len() >= FAILED_OPS_CAP {
                ring.pop_front();
            }
            ring.push_back(FailedOp { task_id: task.id().to_string(), op: task.op, message, failed_at: Utc::now() });
        }
    }

    /// Drains the queue under a deadline (spec.md §4.4 "FlushNow").
    pub async fn flush_now(&self, cancel: &CancellationToken, deadline: std::time::Duration) {
        let started = std::time::Instant::now();
        loop {
            if started.elapsed() >= deadline || cancel.is_cancelled() {
                break;
            }
            let drained = self.run_batch(cancel).await;
            if drained == 0 {
                break;
            }
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, AtomicOrdering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, AtomicOrdering::Release);
        self.not_empty.notify_waiters();
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, AtomicOrdering::Release);
        self.not_empty.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(AtomicOrdering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(AtomicOrdering::Acquire)
    }

    /// Samples current memory against the configured thresholds; hysteresis
    /// between `memory_limit_mb` (engage) and `memory_warning_mb` (release)
    /// avoids enqueue flapping at the boundary (spec.md §4.4 step 6).
    pub fn sample_memory(&self, used_mb: u64) {
        self.metrics.memory_usage_mb.store(used_mb as i64, AtomicOrdering::Relaxed);
        if used_mb >= self.config.memory_limit_mb {
            self.memory_pressure.store(true, AtomicOrdering::Release);
        } else if used_mb < self.config.memory_warning_mb {
            self.memory_pressure.store(false, AtomicOrdering::Release);
        }
    }

    pub fn metrics_snapshot(&self) -> PipelineMetricsSnapshot {
        let queue_size = self.queue.lock().unwrap_or_else(|e| e.into_inner()).len();
        PipelineMetricsSnapshot {
            processed: self.metrics.processed.load(AtomicOrdering::Relaxed),
            indexed: self.metrics.indexed.load(AtomicOrdering::Relaxed),
            updated: self.metrics.updated.load(AtomicOrdering::Relaxed),
            deleted: self.metrics.deleted.load(AtomicOrdering::Relaxed),
            skipped: self.metrics.skipped.load(AtomicOrdering::Relaxed),
            failed: self.metrics.failed.load(AtomicOrdering::Relaxed),
            retries: self.metrics.retries.load(AtomicOrdering::Relaxed),
            queue_size,
            batches_processed: self.metrics.batches_processed.load(AtomicOrdering::Relaxed),
            batches_failed: self.metrics.batches_failed.load(AtomicOrdering::Relaxed),
            memory_usage_mb: self.metrics.memory_usage_mb.load(AtomicOrdering::Relaxed),
            active_workers: self.metrics.active_workers.load(AtomicOrdering::Relaxed),
        }
    }

    pub fn failed_ops(&self) -> Vec<FailedOp> {
        self.failed_ops.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
    }

    /// Spawns the configured worker pool; each worker waits on the queue's
    /// not-empty notification with a `batch_timeout` fallback poll
    /// (spec.md §4.4 worker loop step 1).
    pub fn spawn_workers(self: Arc<Self>, cancel: CancellationToken) {
        for worker_id in 0..self.config.worker_count {
            let pipeline = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                info!(worker_id, index = %pipeline.index_name, "indexing worker started");
                loop {
                    if cancel.is_cancelled() || pipeline.is_shutdown() {
                        break;
                    }
                    if pipeline.is_paused() {
                        tokio::time::sleep(pipeline.config.batch_timeout).await;
                        continue;
                    }

                    tokio::select! {
                        _ = pipeline.not_empty.notified() => {},
                        _ = tokio::time::sleep(pipeline.config.batch_timeout) => {},
                        _ = cancel.cancelled() => break,
                    }

                    pipeline.run_batch(&cancel).await;
                }
                info!(worker_id, index = %pipeline.index_name, "indexing worker stopped");
            });
        }
    }
}

/// Builds a bulk action for an already-analyzed document — used when the
/// pipeline batches several tasks into a single `_bulk` submission instead
/// of per-doc calls (an optional throughput optimization over `submit`).
pub fn to_bulk_op(index: &str, op: IndexOp, id: &str, doc: Value) -> BulkOp {
    match op {
        IndexOp::Delete => BulkOp::Delete { index: index.to_string(), id: id.to_string() },
        IndexOp::Update | IndexOp::UpdateMetrics => BulkOp::Update { index: index.to_string(), id: id.to_string(), partial: doc },
        IndexOp::Create => BulkOp::Index { index: index.to_string(), id: id.to_string(), doc },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorSnapshot, BoostFactors, EngagementMetrics, UserStatus, VerificationLevel, VerificationRecord, Visibility};

    fn sample_note(id: &str) -> NoteDocument {
        let now = Utc::now();
        NoteDocument {
            id: id.to_string(),
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            display_name: "Alice".to_string(),
            text: "hello world".to_string(),
            hashtags: vec![],
            mentions: vec![],
            media_urls: vec![],
            language: "en".to_string(),
            location: None,
            reply_to_id: None,
            repost_of_id: None,
            thread_id: None,
            visibility: Visibility::Public,
            nsfw: false,
            sensitive: false,
            created_at: now,
            updated_at: now,
            metrics: EngagementMetrics::default(),
            author: AuthorSnapshot::default(),
            boosts: BoostFactors::default(),
            quality_score: None,
            spam_score: None,
            is_bot_author: false,
            topics: vec![],
            sentiment: None,
        }
    }

    fn sample_task(id: &str, priority: i32, scheduled_at: DateTime<Utc>, op: IndexOp) -> IndexingTask {
        IndexingTask {
            op,
            document: IndexableDocument::Note(Box::new(sample_note(id))),
            priority,
            enqueued_at: Utc::now(),
            scheduled_at,
            retry_count: 0,
            correlation_id: "c1".to_string(),
        }
    }

    #[test]
    fn queue_pops_higher_priority_first() {
        let mut queue = PipelineQueue::new();
        let now = Utc::now();
        queue.push(QueueEntry { priority: 0, scheduled_at: now, seq: 0, task: sample_task("a", 0, now, IndexOp::Create) });
        queue.push(QueueEntry {
            priority: 10,
            scheduled_at: now + chrono::Duration::milliseconds(1),
            seq: 1,
            task: sample_task("b", 10, now + chrono::Duration::milliseconds(1), IndexOp::Create),
        });
        let popped = queue.pop_ready(now + chrono::Duration::seconds(1), 10);
        assert_eq!(popped[0].id(), "b");
        assert_eq!(popped[1].id(), "a");
    }

    #[test]
    fn duplicate_ids_collapse_to_latest_scheduled() {
        let mut queue = PipelineQueue::new();
        let now = Utc::now();
        queue.push(QueueEntry { priority: 0, scheduled_at: now, seq: 0, task: sample_task("a", 0, now, IndexOp::Update) });
        let later = now + chrono::Duration::seconds(5);
        queue.push(QueueEntry { priority: 0, scheduled_at: later, seq: 1, task: sample_task("a", 0, later, IndexOp::Update) });
        assert_eq!(queue.len(), 1);
        let popped = queue.pop_ready(later + chrono::Duration::seconds(1), 10);
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].scheduled_at, later);
    }

    #[test]
    fn later_create_wins_over_earlier_delete() {
        let mut queue = PipelineQueue::new();
        let now = Utc::now();
        queue.push(QueueEntry { priority: 0, scheduled_at: now, seq: 0, task: sample_task("a", 0, now, IndexOp::Delete) });
        let later = now + chrono::Duration::seconds(1);
        queue.push(QueueEntry { priority: 0, scheduled_at: later, seq: 1, task: sample_task("a", 0, later, IndexOp::Create) });
        let popped = queue.pop_ready(later + chrono::Duration::seconds(1), 10);
        assert_eq!(popped.len(), 1);
        assert_eq!(popped[0].op, IndexOp::Create);
    }

    #[test]
    fn not_ready_tasks_stay_deferred() {
        let mut queue = PipelineQueue::new();
        let now = Utc::now();
        let future = now + chrono::Duration::seconds(60);
        queue.push(QueueEntry { priority: 0, scheduled_at: future, seq: 0, task: sample_task("a", 0, future, IndexOp::Create) });
        let popped = queue.pop_ready(now, 10);
        assert!(popped.is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn note_priority_rewards_verified_and_engaged_authors() {
        let mut doc = sample_note("n1");
        doc.author.verification = VerificationLevel::Identity;
        doc.metrics.engagement_score = 0.9;
        doc.metrics.virality_score = 0.9;
        doc.hashtags.push("rust".to_string());
        let now = doc.created_at;
        assert_eq!(note_priority(&doc, now), 10 + 5 + 8 + 3 + 2);
    }

    #[test]
    fn user_priority_rewards_organization_and_reputation() {
        let now = Utc::now();
        let doc = UserDocument {
            id: "u1".to_string(),
            username: "org".to_string(),
            display_name: "Org".to_string(),
            bio: String::new(),
            avatar_url: None,
            banner_url: None,
            location: None,
            website: None,
            created_at: now,
            updated_at: now,
            last_active_at: now,
            verification: VerificationRecord { level: VerificationLevel::Organization, verified_at: None, badge: None },
            social: crate::models::SocialMetrics { followers: 20_000, following: 10, notes_count: 5, likes_given: 1, likes_received: 1 },
            reputation: Some(90.0),
            influence: None,
            authenticity: None,
            is_private: false,
            searchable: true,
            indexable: true,
            status: UserStatus::Active,
            boosts: BoostFactors::default(),
        };
        assert_eq!(user_priority(&doc, now), 10 + 8 + 5 + 3);
    }

    #[tokio::test]
    async fn enqueue_rejects_private_notes() {
        let backend = Arc::new(BackendClient::new(crate::config::BackendConfig::from_env()).unwrap());
        let pipeline = IndexingPipeline::new(crate::config::PipelineConfig::notes_from_env(), backend, "notes");
        let mut note = sample_note("private");
        note.visibility = Visibility::Private;
        let task = IndexingTask {
            op: IndexOp::Create,
            document: IndexableDocument::Note(Box::new(note)),
            priority: 0,
            enqueued_at: Utc::now(),
            scheduled_at: Utc::now(),
            retry_count: 0,
            correlation_id: "c".to_string(),
        };
        assert!(!pipeline.enqueue(task));
    }

    fn sample_user(id: &str) -> UserDocument {
        let now = Utc::now();
        UserDocument {
            id: id.to_string(),
            username: "bob".to_string(),
            display_name: "Bob".to_string(),
            bio: "software engineer who loves rust".to_string(),
            avatar_url: Some("https://example.com/a.png".to_string()),
            banner_url: None,
            location: Some("earth".to_string()),
            website: None,
            created_at: now - chrono::Duration::days(400),
            updated_at: now,
            last_active_at: now,
            verification: VerificationRecord { level: VerificationLevel::Email, verified_at: None, badge: None },
            social: crate::models::SocialMetrics { followers: 500, following: 100, notes_count: 200, likes_given: 50, likes_received: 300 },
            reputation: None,
            influence: None,
            authenticity: None,
            is_private: false,
            searchable: true,
            indexable: true,
            status: UserStatus::Active,
            boosts: BoostFactors::default(),
        }
    }

    fn test_pipeline() -> IndexingPipeline {
        let backend = Arc::new(BackendClient::new(crate::config::BackendConfig::from_env()).unwrap());
        IndexingPipeline::new(crate::config::PipelineConfig::notes_from_env(), backend, "notes")
    }

    #[test]
    fn analyze_and_score_fills_note_topics_and_sentiment() {
        let pipeline = test_pipeline();
        let mut note = sample_note("n1");
        note.text = "I love this new software startup and its AI".to_string();
        let mut document = IndexableDocument::Note(Box::new(note));
        pipeline.analyze_and_score(&mut document);
        match document {
            IndexableDocument::Note(n) => {
                assert!(n.topics.contains(&"technology".to_string()));
                assert_eq!(n.sentiment, Some(crate::analyzer::Sentiment::Positive));
            }
            IndexableDocument::User(_) => unreachable!(),
        }
    }

    #[test]
    fn analyze_and_score_fills_user_reputation_influence_authenticity() {
        let pipeline = test_pipeline();
        let mut document = IndexableDocument::User(Box::new(sample_user("u1")));
        pipeline.analyze_and_score(&mut document);
        match document {
            IndexableDocument::User(u) => {
                assert!(u.reputation.is_some());
                assert!(u.influence.unwrap() > 0.0);
                assert!(u.authenticity.unwrap() > 0.0);
            }
            IndexableDocument::Note(_) => unreachable!(),
        }
    }
}
