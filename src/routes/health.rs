//! Health and metrics endpoints. `health` aggregates component status per
//! spec.md §4.10; `metrics` renders the Prometheus registry, gated by its
//! own token-bucket check rather than going through the search controller
//! (it isn't one of C10's RPCs).

use std::sync::Arc;

use rocket::get;
use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket::State;

use crate::auth::BearerToken;
use crate::orchestrator::{ServiceHealth, ServiceOrchestrator};
use crate::rate_limit::RateLimitedError;

use super::ClientIp;

fn health_label(status: ServiceHealth) -> &'static str {
    match status {
        ServiceHealth::Healthy => "healthy",
        ServiceHealth::Degraded => "degraded",
        ServiceHealth::Unhealthy => "unhealthy",
        ServiceHealth::Critical => "critical",
    }
}

#[get("/api/v1/health")]
pub async fn health(orchestrator: &State<Arc<ServiceOrchestrator>>) -> Json<serde_json::Value> {
    let (status, components) = orchestrator.health().await;
    Json(serde_json::json!({
        "status": health_label(status),
        "service": "sonet-search-service",
        "version": env!("CARGO_PKG_VERSION"),
        "accepting": orchestrator.is_accepting(),
        "components": components.iter().map(|c| serde_json::json!({
            "name": c.name,
            "status": health_label(c.status),
            "detail": c.detail,
        })).collect::<Vec<_>>(),
    }))
}

#[get("/api/v1/metrics")]
pub async fn metrics(
    orchestrator: &State<Arc<ServiceOrchestrator>>,
    client_ip: ClientIp,
    token: BearerToken,
) -> Result<(ContentType, String), RateLimitedError> {
    let principal = orchestrator.auth_gate.validate(token.0.as_deref()).await;
    let client_key = principal.user_id.clone().unwrap_or_else(|| client_ip.0.clone());
    let tier = orchestrator.tier_table.get(principal.tier);
    let info = orchestrator.rate_limiter.check(&client_key, &tier);
    if !info.allowed {
        return Err(RateLimitedError { info });
    }

    Ok((ContentType::new("text", "plain"), orchestrator.metrics.export()))
}
