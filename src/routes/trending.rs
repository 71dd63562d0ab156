//! Trending RPCs (C10 `TrendingHashtags`/`TrendingUsers`). Thin wrappers
//! around the controller's own 5-minute refresh cache.

use std::sync::Arc;

use rocket::get;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::State;

use crate::auth::BearerToken;
use crate::models::{HashtagResult, SearchResponse, UserResult};
use crate::orchestrator::ServiceOrchestrator;

use super::{envelope, service_unavailable, ClientIp};

#[get("/api/v1/trending/hashtags?<limit>")]
pub async fn trending_hashtags(
    limit: Option<u32>,
    orchestrator: &State<Arc<ServiceOrchestrator>>,
    client_ip: ClientIp,
    token: BearerToken,
) -> Result<Json<SearchResponse<Vec<HashtagResult>>>, Custom<Json<serde_json::Value>>> {
    if !orchestrator.is_accepting() {
        return Err(service_unavailable());
    }
    let principal = orchestrator.auth_gate.validate(token.0.as_deref()).await;
    let client_key = principal.user_id.clone().unwrap_or_else(|| client_ip.0.clone());
    let cancel = orchestrator.cancellation_token();
    let result = orchestrator.controller.get_trending_hashtags(limit.unwrap_or(10), &client_key, &principal, &cancel).await;
    Ok(envelope(result))
}

#[get("/api/v1/trending/users?<limit>")]
pub async fn trending_users(
    limit: Option<u32>,
    orchestrator: &State<Arc<ServiceOrchestrator>>,
    client_ip: ClientIp,
    token: BearerToken,
) -> Result<Json<SearchResponse<Vec<UserResult>>>, Custom<Json<serde_json::Value>>> {
    if !orchestrator.is_accepting() {
        return Err(service_unavailable());
    }
    let principal = orchestrator.auth_gate.validate(token.0.as_deref()).await;
    let client_key = principal.user_id.clone().unwrap_or_else(|| client_ip.0.clone());
    let cancel = orchestrator.cancellation_token();
    let result = orchestrator.controller.get_trending_users(limit.unwrap_or(10), &client_key, &principal, &cancel).await;
    Ok(envelope(result))
}
