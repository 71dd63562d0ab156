//! Integration coverage for the Indexing Pipeline (C4), exercised through
//! its public API rather than the private queue internals unit-tested
//! inside `src/pipeline.rs`.

use chrono::Utc;
use sonet_search_service::backend::BackendClient;
use sonet_search_service::config::{BackendConfig, PipelineConfig};
use sonet_search_service::models::{
    AuthorSnapshot, BoostFactors, EngagementMetrics, IndexOp, IndexableDocument, IndexingTask, NoteDocument, Visibility,
};
use sonet_search_service::pipeline::IndexingPipeline;
use std::sync::Arc;

fn sample_note(id: &str, text: &str) -> NoteDocument {
    let now = Utc::now();
    NoteDocument {
        id: id.to_string(),
        user_id: "u1".to_string(),
        username: "alice".to_string(),
        display_name: "Alice".to_string(),
        text: text.to_string(),
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

fn pipeline() -> IndexingPipeline {
    let backend = Arc::new(BackendClient::new(BackendConfig::from_env()).unwrap());
    IndexingPipeline::new(PipelineConfig::notes_from_env(), backend, "notes")
}

fn create_task(note: NoteDocument, priority: i32) -> IndexingTask {
    IndexingTask {
        op: IndexOp::Create,
        document: IndexableDocument::Note(Box::new(note)),
        priority,
        enqueued_at: Utc::now(),
        scheduled_at: Utc::now(),
        retry_count: 0,
        correlation_id: "it-pipeline".to_string(),
    }
}

#[test]
fn public_note_is_accepted_and_counted_in_queue_depth() {
    let pipeline = pipeline();
    assert_eq!(pipeline.metrics_snapshot().queue_size, 0);
    assert!(pipeline.enqueue(create_task(sample_note("n1", "hello there"), 0)));
    assert_eq!(pipeline.metrics_snapshot().queue_size, 1);
}

#[test]
fn private_note_never_reaches_the_queue() {
    let pipeline = pipeline();
    let mut note = sample_note("n2", "secret");
    note.visibility = Visibility::Private;
    assert!(!pipeline.enqueue(create_task(note, 0)));
    assert_eq!(pipeline.metrics_snapshot().queue_size, 0);
}

#[test]
fn pausing_the_pipeline_still_accepts_but_does_not_drain() {
    let pipeline = pipeline();
    pipeline.pause();
    assert!(pipeline.enqueue(create_task(sample_note("n3", "paused world"), 0)));
    assert_eq!(pipeline.metrics_snapshot().queue_size, 1);
    pipeline.resume();
}

#[test]
fn freshly_built_pipeline_has_no_failed_ops() {
    let pipeline = pipeline();
    assert!(pipeline.failed_ops().is_empty());
}
