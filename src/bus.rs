//! Message-Bus Subscriber (C11). Consumes change-event topics and hands
//! decoded `IndexingTask`s to C4 (spec.md §4.9). The bus itself is an
//! external collaborator (spec.md §1) — this module only defines the
//! decode/dispatch shape a real subscriber would run inside, using the
//! teacher's `broadcast`-channel pattern (`events.rs`) to stand in for a
//! partitioned topic in tests and local runs.

use crate::models::{
    AuthorSnapshot, BoostFactors, EngagementMetrics, GeoPoint, IndexOp, IndexableDocument, IndexingTask, NoteDocument,
    SocialMetrics, UserDocument, UserStatus, VerificationLevel, VerificationRecord, Visibility,
};
use crate::pipeline::{note_priority, user_priority, IndexingPipeline};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum BusTopic {
    NoteCreated,
    NoteUpdated,
    NoteDeleted,
    NoteMetrics,
    UserCreated,
    UserUpdated,
    UserDeleted,
    UserMetrics,
}

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: BusTopic,
    pub partition: u32,
    pub payload: Value,
}

/// In-process stand-in for a partitioned topic; a real deployment replaces
/// the `broadcast::Sender` with the actual bus client's publish handle.
#[derive(Clone)]
pub struct MessageBus {
    sender: broadcast::Sender<BusMessage>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(4096);
        Self { sender }
    }

    pub fn publish(&self, message: BusMessage) {
        let _ = self.sender.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Deserialize)]
struct NoteCreatedPayload {
    id: String,
    user_id: String,
    username: String,
    display_name: String,
    content: String,
    #[serde(default)]
    created_at: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    visibility: Option<String>,
    #[serde(default)]
    location: Option<GeoPoint>,
}

#[derive(Debug, Deserialize)]
struct NoteMetricsPayload {
    id: String,
    likes: u64,
    reposts: u64,
    replies: u64,
    views: u64,
}

#[derive(Debug, Deserialize)]
struct UserCreatedPayload {
    id: String,
    username: String,
    display_name: String,
    #[serde(default)]
    bio: String,
}

#[derive(Debug, Deserialize)]
struct UserMetricsPayload {
    id: String,
    followers: u64,
    following: u64,
    #[serde(default)]
    notes_count: u64,
}

fn parse_visibility(s: Option<&str>) -> Visibility {
    match s {
        Some("unlisted") => Visibility::Unlisted,
        Some("followers") => Visibility::Followers,
        Some("private") => Visibility::Private,
        _ => Visibility::Public,
    }
}

fn decode_note_created(payload: &Value) -> Result<NoteDocument, serde_json::Error> {
    let parsed: NoteCreatedPayload = serde_json::from_value(payload.clone())?;
    let now = Utc::now();
    Ok(NoteDocument {
        id: parsed.id,
        user_id: parsed.user_id,
        username: parsed.username,
        display_name: parsed.display_name,
        text: parsed.content,
        hashtags: vec![],
        mentions: vec![],
        media_urls: vec![],
        language: "en".to_string(),
        location: parsed.location,
        reply_to_id: None,
        repost_of_id: None,
        thread_id: None,
        visibility: parse_visibility(parsed.visibility.as_deref()),
        nsfw: false,
        sensitive: false,
        created_at: parsed.created_at.unwrap_or(now),
        updated_at: now,
        metrics: EngagementMetrics::default(),
        author: AuthorSnapshot::default(),
        boosts: BoostFactors::default(),
        quality_score: None,
        spam_score: None,
        is_bot_author: false,
        topics: vec![],
        sentiment: None,
    })
}

fn decode_user_created(payload: &Value) -> Result<UserDocument, serde_json::Error> {
    let parsed: UserCreatedPayload = serde_json::from_value(payload.clone())?;
    let now = Utc::now();
    Ok(UserDocument {
        id: parsed.id,
        username: parsed.username,
        display_name: parsed.display_name,
        bio: parsed.bio,
        avatar_url: None,
        banner_url: None,
        location: None,
        website: None,
        created_at: now,
        updated_at: now,
        last_active_at: now,
        verification: VerificationRecord { level: VerificationLevel::None, verified_at: None, badge: None },
        social: SocialMetrics::default(),
        reputation: None,
        influence: None,
        authenticity: None,
        is_private: false,
        searchable: true,
        indexable: true,
        status: UserStatus::Active,
        boosts: BoostFactors::default(),
    })
}

/// Maps a decoded bus message to an `IndexingTask` and hands it to the
/// matching pipeline; acks (returns `true`) only when `Enqueue` accepts it,
/// so back-pressured deliveries are nacked for redelivery (spec.md §4.9).
pub async fn dispatch(message: &BusMessage, note_pipeline: &Arc<IndexingPipeline>, user_pipeline: &Arc<IndexingPipeline>) -> bool {
    let now = Utc::now();
    let correlation_id = Uuid::new_v4().to_string();

    match message.topic {
        BusTopic::NoteCreated => match decode_note_created(&message.payload) {
            Ok(note) => {
                let priority = note_priority(&note, now);
                let task = IndexingTask {
                    op: IndexOp::Create,
                    document: IndexableDocument::Note(Box::new(note)),
                    priority,
                    enqueued_at: now,
                    scheduled_at: now,
                    retry_count: 0,
                    correlation_id,
                };
                note_pipeline.enqueue(task)
            }
            Err(e) => {
                warn!(error = %e, "failed to decode note.created payload");
                false
            }
        },
        BusTopic::NoteMetrics => match serde_json::from_value::<NoteMetricsPayload>(message.payload.clone()) {
            Ok(metrics) => {
                let mut note = blank_note(&metrics.id);
                note.metrics.likes = metrics.likes;
                note.metrics.reposts = metrics.reposts;
                note.metrics.replies = metrics.replies;
                note.metrics.views = metrics.views;
                note.quality_score = Some(0.5);
                let task = IndexingTask {
                    op: IndexOp::UpdateMetrics,
                    document: IndexableDocument::Note(Box::new(note)),
                    priority: 0,
                    enqueued_at: now,
                    scheduled_at: now,
                    retry_count: 0,
                    correlation_id,
                };
                note_pipeline.enqueue(task)
            }
            Err(e) => {
                warn!(error = %e, "failed to decode note.metrics payload");
                false
            }
        },
        BusTopic::NoteDeleted => match message.payload.get("id").and_then(Value::as_str) {
            Some(id) => {
                let mut note = blank_note(id);
                note.quality_score = Some(1.0);
                let task = IndexingTask {
                    op: IndexOp::Delete,
                    document: IndexableDocument::Note(Box::new(note)),
                    priority: 20,
                    enqueued_at: now,
                    scheduled_at: now,
                    retry_count: 0,
                    correlation_id,
                };
                note_pipeline.enqueue(task)
            }
            None => false,
        },
        BusTopic::NoteUpdated => match decode_note_created(&message.payload) {
            Ok(note) => {
                let priority = note_priority(&note, now);
                let task = IndexingTask {
                    op: IndexOp::Update,
                    document: IndexableDocument::Note(Box::new(note)),
                    priority,
                    enqueued_at: now,
                    scheduled_at: now,
                    retry_count: 0,
                    correlation_id,
                };
                note_pipeline.enqueue(task)
            }
            Err(e) => {
                warn!(error = %e, "failed to decode note.updated payload");
                false
            }
        },
        BusTopic::UserCreated | BusTopic::UserUpdated => match decode_user_created(&message.payload) {
            Ok(user) => {
                let priority = user_priority(&user, now);
                let op = if matches!(message.topic, BusTopic::UserCreated) { IndexOp::Create } else { IndexOp::Update };
                let task = IndexingTask {
                    op,
                    document: IndexableDocument::User(Box::new(user)),
                    priority,
                    enqueued_at: now,
                    scheduled_at: now,
                    retry_count: 0,
                    correlation_id,
                };
                user_pipeline.enqueue(task)
            }
            Err(e) => {
                error!(error = %e, "failed to decode user payload");
                false
            }
        },
        BusTopic::UserMetrics => match serde_json::from_value::<UserMetricsPayload>(message.payload.clone()) {
            Ok(metrics) => {
                let mut user = blank_user(&metrics.id);
                user.social.followers = metrics.followers;
                user.social.following = metrics.following;
                user.social.notes_count = metrics.notes_count;
                let task = IndexingTask {
                    op: IndexOp::UpdateMetrics,
                    document: IndexableDocument::User(Box::new(user)),
                    priority: 0,
                    enqueued_at: now,
                    scheduled_at: now,
                    retry_count: 0,
                    correlation_id,
                };
                user_pipeline.enqueue(task)
            }
            Err(e) => {
                warn!(error = %e, "failed to decode user.metrics payload");
                false
            }
        },
        BusTopic::UserDeleted => match message.payload.get("id").and_then(Value::as_str) {
            Some(id) => {
                let user = blank_user(id);
                let task = IndexingTask {
                    op: IndexOp::Delete,
                    document: IndexableDocument::User(Box::new(user)),
                    priority: 20,
                    enqueued_at: now,
                    scheduled_at: now,
                    retry_count: 0,
                    correlation_id,
                };
                user_pipeline.enqueue(task)
            }
            None => false,
        },
    }
}

fn blank_note(id: &str) -> NoteDocument {
    let now = Utc::now();
    NoteDocument {
        id: id.to_string(),
        user_id: String::new(),
        username: String::new(),
        display_name: String::new(),
        text: String::new(),
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

fn blank_user(id: &str) -> UserDocument {
    let now = Utc::now();
    UserDocument {
        id: id.to_string(),
        username: String::new(),
        display_name: String::new(),
        bio: String::new(),
        avatar_url: None,
        banner_url: None,
        location: None,
        website: None,
        created_at: now,
        updated_at: now,
        last_active_at: now,
        verification: VerificationRecord { level: VerificationLevel::None, verified_at: None, badge: None },
        social: SocialMetrics::default(),
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

/// Runs one task per partition, preserving in-partition delivery order
/// (spec.md §4.9 "one goroutine/task per topic partition").
pub fn spawn_partition_consumer(
    mut receiver: broadcast::Receiver<BusMessage>,
    note_pipeline: Arc<IndexingPipeline>,
    user_pipeline: Arc<IndexingPipeline>,
) {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let accepted = dispatch(&message, &note_pipeline, &user_pipeline).await;
                    if !accepted {
                        warn!(partition = message.partition, "bus message nacked: pipeline back-pressured");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "bus consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendClient;
    use crate::config::{BackendConfig, PipelineConfig};
    use serde_json::json;

    fn pipelines() -> (Arc<IndexingPipeline>, Arc<IndexingPipeline>) {
        let backend = Arc::new(BackendClient::new(BackendConfig::from_env()).unwrap());
        let notes = Arc::new(IndexingPipeline::new(PipelineConfig::notes_from_env(), Arc::clone(&backend), "notes"));
        let users = Arc::new(IndexingPipeline::new(PipelineConfig::users_from_env(), backend, "users"));
        (notes, users)
    }

    #[tokio::test]
    async fn note_created_dispatches_to_note_pipeline() {
        let (notes, users) = pipelines();
        let message = BusMessage {
            topic: BusTopic::NoteCreated,
            partition: 0,
            payload: json!({
                "id": "n1", "user_id": "u1", "username": "alice", "display_name": "Alice",
                "content": "hello there", "visibility": "public"
            }),
        };
        assert!(dispatch(&message, &notes, &users).await);
        assert_eq!(notes.metrics_snapshot().queue_size, 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_not_acked() {
        let (notes, users) = pipelines();
        let message = BusMessage { topic: BusTopic::NoteCreated, partition: 0, payload: json!({ "id": "n1" }) };
        assert!(!dispatch(&message, &notes, &users).await);
    }
}
