//! `/stream` SSE endpoint — fans out `IndexingPipeline` completion events
//! from both pipelines (SPEC_FULL.md §2). Ops/demo surface, not part of the
//! search RPC contract proper; grounded on the teacher's `message_stream`
//! (`routes.rs`), same `EventStream!` + `tokio::select!` heartbeat shape.

use std::sync::Arc;
use std::time::Duration;

use rocket::get;
use rocket::response::stream::{Event, EventStream};
use rocket::State;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::orchestrator::ServiceOrchestrator;

#[get("/api/v1/stream")]
pub fn stream(orchestrator: &State<Arc<ServiceOrchestrator>>) -> EventStream![] {
    let mut notes: broadcast::Receiver<crate::pipeline::IndexEvent> = orchestrator.note_pipeline.subscribe_events();
    let mut users: broadcast::Receiver<crate::pipeline::IndexEvent> = orchestrator.user_pipeline.subscribe_events();

    EventStream! {
        let mut heartbeat = interval(Duration::from_secs(15));
        loop {
            tokio::select! {
                ev = notes.recv() => {
                    match ev {
                        Ok(event) => yield Event::json(&event).event("note_indexed"),
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
                ev = users.recv() => {
                    match ev {
                        Ok(event) => yield Event::json(&event).event("user_indexed"),
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
                _ = heartbeat.tick() => {
                    let now = chrono::Utc::now().to_rfc3339();
                    yield Event::json(&serde_json::json!({"time": now})).event("heartbeat");
                }
            }
        }
    }
}
