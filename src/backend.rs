//! Index Backend Client (C1). Thin, cancellable wrapper over an external
//! full-text HTTP+JSON index — the `reqwest::Client::builder()...timeout(...)`
//! construction mirrors the webhook dispatcher's client setup, generalized
//! to a full request/response surface with typed retriable errors.

use crate::config::{BackendAuth, BackendConfig};
use crate::error::BackendError;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClusterHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub number_of_nodes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteResult {
    Created,
    Updated,
}

/// One action in a `_bulk` submission (spec.md §6).
#[derive(Debug, Clone)]
pub enum BulkOp {
    Index { index: String, id: String, doc: Value },
    Update { index: String, id: String, partial: Value },
    Delete { index: String, id: String },
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<Value>,
}

/// Index Backend Client (C1). Holds a pooled `reqwest::Client`; every
/// method is individually timed out against `request_timeout` and
/// cooperatively cancellable via the passed-in token.
pub struct BackendClient {
    client: reqwest::Client,
    hosts: Vec<String>,
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections_per_host)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| BackendError::connection(e.to_string()))?;

        if config.hosts.is_empty() {
            return Err(BackendError::connection("no backend hosts configured"));
        }

        Ok(Self { client, hosts: config.hosts.clone(), config })
    }

    fn base_url(&self) -> &str {
        // Round-robin across configured hosts is a future enhancement; a
        // single primary keeps this client simple for now.
        &self.hosts[0]
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth {
            BackendAuth::None => builder,
            BackendAuth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            BackendAuth::ApiKey(key) => builder.header("Authorization", format!("ApiKey {key}")),
        }
    }

    async fn run<F, Fut>(&self, cancel: &tokio_util::sync::CancellationToken, f: F) -> Result<reqwest::Response, BackendError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        if cancel.is_cancelled() {
            return Err(BackendError::cancelled());
        }

        let result = tokio::select! {
            res = timeout(self.config.request_timeout, f()) => res,
            _ = cancel.cancelled() => return Err(BackendError::cancelled()),
        };

        match result {
            Ok(Ok(resp)) => {
                if resp.status().is_success() {
                    Ok(resp)
                } else {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    warn!(status, body = %body, "backend returned error status");
                    Err(BackendError::from_status(status, body))
                }
            }
            Ok(Err(e)) => Err(BackendError::connection(e.to_string())),
            Err(_) => Err(BackendError::timeout("request exceeded request_timeout")),
        }
    }

    pub async fn health_check(&self, cancel: &tokio_util::sync::CancellationToken) -> Result<ClusterHealth, BackendError> {
        let url = format!("{}/_cluster/health", self.base_url());
        let resp = self.run(cancel, || self.apply_auth(self.client.get(&url)).send()).await?;
        resp.json::<ClusterHealth>().await.map_err(|e| BackendError::parse(e.to_string()))
    }

    pub async fn create_index(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        name: &str,
        mapping_and_settings: Value,
    ) -> Result<(), BackendError> {
        let url = format!("{}/{name}", self.base_url());
        self.run(cancel, || self.apply_auth(self.client.put(&url).json(&mapping_and_settings)).send()).await?;
        Ok(())
    }

    pub async fn index_doc(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        index: &str,
        id: &str,
        doc: Value,
    ) -> Result<WriteResult, BackendError> {
        debug!(index, id, "indexing document");
        let url = format!("{}/{index}/_doc/{id}", self.base_url());
        let resp = self.run(cancel, || self.apply_auth(self.client.put(&url).json(&doc)).send()).await?;
        let body: Value = resp.json().await.map_err(|e| BackendError::parse(e.to_string()))?;
        match body.get("result").and_then(Value::as_str) {
            Some("created") => Ok(WriteResult::Created),
            _ => Ok(WriteResult::Updated),
        }
    }

    pub async fn update_doc(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        index: &str,
        id: &str,
        partial: Value,
    ) -> Result<(), BackendError> {
        let url = format!("{}/{index}/_update/{id}", self.base_url());
        let body = serde_json::json!({ "doc": partial });
        self.run(cancel, || self.apply_auth(self.client.post(&url).json(&body)).send()).await?;
        Ok(())
    }

    pub async fn delete_doc(&self, cancel: &tokio_util::sync::CancellationToken, index: &str, id: &str) -> Result<(), BackendError> {
        let url = format!("{}/{index}/_doc/{id}", self.base_url());
        self.run(cancel, || self.apply_auth(self.client.delete(&url)).send()).await?;
        Ok(())
    }

    /// Submits newline-delimited action+document pairs (spec.md §6).
    pub async fn bulk(&self, cancel: &tokio_util::sync::CancellationToken, ops: &[BulkOp]) -> Result<BulkResponse, BackendError> {
        if ops.is_empty() {
            return Ok(BulkResponse::default());
        }
        let mut body = String::new();
        for op in ops {
            match op {
                BulkOp::Index { index, id, doc } => {
                    body.push_str(&serde_json::json!({"index": {"_index": index, "_id": id}}).to_string());
                    body.push('\n');
                    body.push_str(&doc.to_string());
                    body.push('\n');
                }
                BulkOp::Update { index, id, partial } => {
                    body.push_str(&serde_json::json!({"update": {"_index": index, "_id": id}}).to_string());
                    body.push('\n');
                    body.push_str(&serde_json::json!({"doc": partial}).to_string());
                    body.push('\n');
                }
                BulkOp::Delete { index, id } => {
                    body.push_str(&serde_json::json!({"delete": {"_index": index, "_id": id}}).to_string());
                    body.push('\n');
                }
            }
        }

        let url = format!("{}/_bulk", self.base_url());
        let resp = self
            .run(cancel, || {
                self.apply_auth(self.client.post(&url).header("Content-Type", "application/x-ndjson").body(body.clone())).send()
            })
            .await?;
        resp.json::<BulkResponse>().await.map_err(|e| BackendError::parse(e.to_string()))
    }

    pub async fn search(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        indices: &[String],
        query_doc: &Value,
    ) -> Result<Value, BackendError> {
        let joined = indices.join(",");
        let url = format!("{}/{joined}/_search", self.base_url());
        let resp = self.run(cancel, || self.apply_auth(self.client.post(&url).json(query_doc)).send()).await?;
        resp.json::<Value>().await.map_err(|e| BackendError::parse(e.to_string()))
    }

    pub async fn count(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        indices: &[String],
        query_doc: &Value,
    ) -> Result<i64, BackendError> {
        let joined = indices.join(",");
        let url = format!("{}/{joined}/_count", self.base_url());
        let resp = self.run(cancel, || self.apply_auth(self.client.post(&url).json(query_doc)).send()).await?;
        let body: Value = resp.json().await.map_err(|e| BackendError::parse(e.to_string()))?;
        Ok(body.get("count").and_then(Value::as_i64).unwrap_or(0))
    }

    pub async fn scroll(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        scroll_id: &str,
        keep_alive: Duration,
    ) -> Result<Value, BackendError> {
        let url = format!("{}/_search/scroll", self.base_url());
        let body = serde_json::json!({ "scroll": format!("{}s", keep_alive.as_secs()), "scroll_id": scroll_id });
        let resp = self.run(cancel, || self.apply_auth(self.client.post(&url).json(&body)).send()).await?;
        resp.json::<Value>().await.map_err(|e| BackendError::parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_op_serializes_ndjson_shape() {
        let ops = vec![BulkOp::Delete { index: "notes".to_string(), id: "1".to_string() }];
        assert_eq!(ops.len(), 1);
    }
}
