//! Auth Gate (C9). Parses `Authorization: Bearer <token>`, validates
//! against an external identity service (opaque to this component, per
//! spec.md §4.8), and caches positive results briefly. A `FromRequest`
//! guard (`BearerToken`) extracts the header in the teacher's `ClientIp`/
//! `AdminKey` style.

use crate::config::{IdentityConfig, Tier};
use rocket::request::{FromRequest, Outcome, Request};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Principal {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub permissions: Vec<String>,
    pub tier: Tier,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self { authenticated: false, user_id: None, permissions: vec!["public_search".to_string()], tier: Tier::Anonymous }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// The raw bearer token lifted off the request, if present. Not itself
/// proof of identity — `AuthGate::validate` still has to run.
pub struct BearerToken(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = req.headers().get_one("Authorization").and_then(|h| h.strip_prefix("Bearer ")).map(str::to_string);
        Outcome::Success(BearerToken(token))
    }
}

/// Opaque interface to the external identity service this component
/// delegates to — never implemented here (spec.md §1 "external
/// collaborators").
#[rocket::async_trait]
pub trait IdentityValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Option<Principal>;
}

#[derive(Deserialize)]
struct IdentityResponse {
    authenticated: bool,
    user_id: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    tier: Option<String>,
}

fn parse_tier(tier: Option<&str>) -> Tier {
    match tier {
        Some("verified") => Tier::Verified,
        Some("internal") => Tier::Internal,
        Some("standard") => Tier::Standard,
        _ => Tier::Anonymous,
    }
}

/// HTTP client for the external identity service — reqwest over rustls,
/// same shape as `BackendClient` (spec.md §4.8, "assume a stable external
/// identity service"). An unreachable or unconfigured service degrades to
/// anonymous rather than failing the request.
pub struct RemoteIdentityValidator {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteIdentityValidator {
    pub fn new(config: &IdentityConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, base_url: config.base_url.clone() }
    }
}

#[rocket::async_trait]
impl IdentityValidator for RemoteIdentityValidator {
    async fn validate(&self, token: &str) -> Option<Principal> {
        if self.base_url.is_empty() {
            return None;
        }

        let response = self
            .client
            .get(format!("{}/v1/identity", self.base_url.trim_end_matches('/')))
            .bearer_auth(token)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let body: IdentityResponse = response.json().await.ok()?;
        if !body.authenticated {
            return None;
        }

        Some(Principal {
            authenticated: true,
            user_id: body.user_id,
            permissions: if body.permissions.is_empty() {
                vec!["public_search".to_string(), "search".to_string()]
            } else {
                body.permissions
            },
            tier: parse_tier(body.tier.as_deref()),
        })
    }
}

struct CachedPrincipal {
    principal: Principal,
    cached_at: Instant,
}

/// Validates bearer tokens and caches positive results for up to 60s
/// (spec.md §4.8).
pub struct AuthGate<V: IdentityValidator> {
    validator: V,
    cache: Mutex<HashMap<String, CachedPrincipal>>,
    cache_ttl: Duration,
}

impl<V: IdentityValidator> AuthGate<V> {
    pub fn new(validator: V) -> Self {
        Self { validator, cache: Mutex::new(HashMap::new()), cache_ttl: Duration::from_secs(60) }
    }

    pub async fn validate(&self, token: Option<&str>) -> Principal {
        let Some(token) = token else {
            return Principal::anonymous();
        };

        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.get(token) {
                if cached.cached_at.elapsed() < self.cache_ttl {
                    return cached.principal.clone();
                }
            }
        }

        match self.validator.validate(token).await {
            Some(principal) => {
                let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.insert(token.to_string(), CachedPrincipal { principal: principal.clone(), cached_at: Instant::now() });
                principal
            }
            None => Principal::anonymous(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysValid;

    #[rocket::async_trait]
    impl IdentityValidator for AlwaysValid {
        async fn validate(&self, token: &str) -> Option<Principal> {
            Some(Principal {
                authenticated: true,
                user_id: Some(token.to_string()),
                permissions: vec!["public_search".to_string(), "search".to_string()],
                tier: Tier::Standard,
            })
        }
    }

    struct AlwaysInvalid;

    #[rocket::async_trait]
    impl IdentityValidator for AlwaysInvalid {
        async fn validate(&self, _token: &str) -> Option<Principal> {
            None
        }
    }

    #[tokio::test]
    async fn missing_token_is_anonymous() {
        let gate = AuthGate::new(AlwaysValid);
        let principal = gate.validate(None).await;
        assert!(!principal.authenticated);
        assert!(principal.has_permission("public_search"));
    }

    #[tokio::test]
    async fn valid_token_authenticates() {
        let gate = AuthGate::new(AlwaysValid);
        let principal = gate.validate(Some("tok123")).await;
        assert!(principal.authenticated);
        assert_eq!(principal.user_id.as_deref(), Some("tok123"));
    }

    #[tokio::test]
    async fn invalid_token_falls_back_to_anonymous() {
        let gate = AuthGate::new(AlwaysInvalid);
        let principal = gate.validate(Some("bad")).await;
        assert!(!principal.authenticated);
    }

    #[tokio::test]
    async fn positive_result_is_cached() {
        let gate = AuthGate::new(AlwaysValid);
        let first = gate.validate(Some("tok")).await;
        let second = gate.validate(Some("tok")).await;
        assert_eq!(first.user_id, second.user_id);
    }
}
