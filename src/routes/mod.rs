// Route module decomposition — one file per RPC group, mirroring the
// teacher's domain-area split. Shared request guards and response helpers
// live here; route functions in submodules.

mod health;
mod search;
mod stream;
mod suggest;
mod trending;

pub use health::{health, metrics};
pub use search::{search_notes, search_users};
pub use stream::stream;
pub use suggest::{autocomplete, suggestions};
pub use trending::{trending_hashtags, trending_users};

use crate::error::ServiceError;
use crate::models::{SearchResponse, SortOrder};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::Serialize;
use uuid::Uuid;

/// Caller's address, preferring a reverse-proxy-set header over the raw
/// peer address.
pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

pub(crate) fn parse_sort(sort: Option<&str>) -> SortOrder {
    match sort.unwrap_or("relevance") {
        "recency" => SortOrder::Recency,
        "popularity" => SortOrder::Popularity,
        "trending" => SortOrder::Trending,
        "mixed_signals" | "mixed" => SortOrder::MixedSignals,
        _ => SortOrder::Relevance,
    }
}

/// Unwraps a controller result into its JSON envelope. The outer `Err` arm
/// only fires for errors the controller itself didn't already fold into a
/// `success:false` payload (spec.md §7's taxonomy has the controller do
/// that folding for every RPC) — kept here as a backstop, not the common
/// path.
pub(crate) fn envelope<T: Serialize>(result: Result<SearchResponse<T>, ServiceError>) -> Json<SearchResponse<T>> {
    match result {
        Ok(response) => Json(response),
        Err(e) => Json(SearchResponse::err(Uuid::new_v4().to_string(), 0, e.code(), e.to_string())),
    }
}

/// 503 returned once the orchestrator has flipped its shutdown flag and
/// stopped accepting new requests (spec.md §4.10).
pub(crate) fn service_unavailable() -> Custom<Json<serde_json::Value>> {
    Custom(
        Status::ServiceUnavailable,
        Json(serde_json::json!({
            "success": false,
            "error_code": "BACKEND_UNAVAILABLE",
            "message": "service is shutting down",
        })),
    )
}

#[rocket::catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(serde_json::json!({"success": false, "error_code": "RATE_LIMIT_EXCEEDED", "message": "too many requests"}))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"success": false, "error_code": "NOT_FOUND", "message": "not found"}))
}
