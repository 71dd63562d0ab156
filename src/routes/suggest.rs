//! Suggestion RPCs (C10 `Suggestions`/`Autocomplete`). `suggestions` serves
//! off the controller's popular-terms cache; `autocomplete` always hits the
//! backend for freshness.

use std::sync::Arc;

use rocket::get;
use rocket::serde::json::Json;
use rocket::State;

use crate::auth::BearerToken;
use crate::models::{SearchResponse, SuggestionResult};
use crate::orchestrator::ServiceOrchestrator;

use super::{envelope, ClientIp};

#[get("/api/v1/suggest?<prefix>")]
pub async fn suggestions(
    prefix: &str,
    orchestrator: &State<Arc<ServiceOrchestrator>>,
    client_ip: ClientIp,
    token: BearerToken,
) -> Json<SearchResponse<Vec<SuggestionResult>>> {
    let principal = orchestrator.auth_gate.validate(token.0.as_deref()).await;
    let client_key = principal.user_id.clone().unwrap_or_else(|| client_ip.0.clone());
    let cancel = orchestrator.cancellation_token();
    let result = orchestrator.controller.get_suggestions(prefix, &client_key, &principal, &cancel).await;
    envelope(result)
}

#[get("/api/v1/autocomplete?<prefix>")]
pub async fn autocomplete(
    prefix: &str,
    orchestrator: &State<Arc<ServiceOrchestrator>>,
    client_ip: ClientIp,
    token: BearerToken,
) -> Json<SearchResponse<Vec<SuggestionResult>>> {
    let principal = orchestrator.auth_gate.validate(token.0.as_deref()).await;
    let client_key = principal.user_id.clone().unwrap_or_else(|| client_ip.0.clone());
    let cancel = orchestrator.cancellation_token();
    let result = orchestrator.controller.autocomplete(prefix, &client_key, &principal, &cancel).await;
    envelope(result)
}
