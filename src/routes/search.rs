//! Search RPCs (C10 `SearchNotes`/`SearchUsers`). Each handler parses the
//! operator query string via `controller::build_query`, authenticates the
//! bearer token, and hands off to `SearchController` — the controller owns
//! rate limiting, caching, and metrics for the request from here.

use std::sync::Arc;

use rocket::get;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::State;

use crate::auth::BearerToken;
use crate::controller::build_query;
use crate::models::{SearchResponse, SearchResult, SearchType};
use crate::orchestrator::ServiceOrchestrator;

use super::{envelope, parse_sort, service_unavailable, ClientIp};

#[get("/api/v1/search/notes?<q>&<sort>&<offset>&<limit>")]
pub async fn search_notes(
    q: &str,
    sort: Option<&str>,
    offset: Option<u32>,
    limit: Option<u32>,
    orchestrator: &State<Arc<ServiceOrchestrator>>,
    client_ip: ClientIp,
    token: BearerToken,
) -> Result<Json<SearchResponse<SearchResult>>, Custom<Json<serde_json::Value>>> {
    if !orchestrator.is_accepting() {
        return Err(service_unavailable());
    }
    let principal = orchestrator.auth_gate.validate(token.0.as_deref()).await;
    let client_key = principal.user_id.clone().unwrap_or_else(|| client_ip.0.clone());
    let query = build_query(q, SearchType::Notes, parse_sort(sort), offset.unwrap_or(0), limit.unwrap_or(20), principal.user_id.clone());

    let cancel = orchestrator.cancellation_token();
    let result = orchestrator.controller.search_notes(query, &client_key, &principal, &cancel).await;
    Ok(envelope(result))
}

#[get("/api/v1/search/users?<q>&<sort>&<offset>&<limit>")]
pub async fn search_users(
    q: &str,
    sort: Option<&str>,
    offset: Option<u32>,
    limit: Option<u32>,
    orchestrator: &State<Arc<ServiceOrchestrator>>,
    client_ip: ClientIp,
    token: BearerToken,
) -> Result<Json<SearchResponse<SearchResult>>, Custom<Json<serde_json::Value>>> {
    if !orchestrator.is_accepting() {
        return Err(service_unavailable());
    }
    let principal = orchestrator.auth_gate.validate(token.0.as_deref()).await;
    let client_key = principal.user_id.clone().unwrap_or_else(|| client_ip.0.clone());
    let query = build_query(q, SearchType::Users, parse_sort(sort), offset.unwrap_or(0), limit.unwrap_or(20), principal.user_id.clone());

    let cancel = orchestrator.cancellation_token();
    let result = orchestrator.controller.search_users(query, &client_key, &principal, &cancel).await;
    Ok(envelope(result))
}
