//! JSON-RPC 2.0 client over HTTPS

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::RpcError;

/// Single-attempt JSON-RPC call. Retries are the caller's business.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, RpcError>;
}

/// HTTP JSON-RPC client
pub struct RpcClient {
    /// HTTP client shared across calls
    http_client: Client,
    /// RPC endpoint URL
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a new RPC client
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        let http_client = Client::builder()
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, request: &JsonRpcRequest<'_>, timeout: Duration) -> Result<Value, RpcError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        decode_response(status.as_u16(), &body)
    }
}

#[async_trait]
impl RpcTransport for RpcClient {
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!(method, id = request.id, "rpc call");

        // reqwest's own timeout covers the request; the outer one also bounds body reads
        match tokio::time::timeout(timeout, self.send(&request, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

/// Turn an HTTP status and raw body into an RPC result
pub(crate) fn decode_response(status: u16, body: &str) -> Result<Value, RpcError> {
    if !(200..300).contains(&status) {
        return Err(RpcError::Http {
            status,
            body: body.chars().take(512).collect(),
        });
    }

    let response: JsonRpcResponse =
        serde_json::from_str(body).map_err(|e| RpcError::Decode(e.to_string()))?;

    if let Some(error) = response.error {
        return Err(RpcError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    Ok(response.result.unwrap_or(Value::Null))
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> RpcError {
    if error.is_timeout() {
        RpcError::Timeout(timeout.as_millis() as u64)
    } else if error.is_decode() {
        RpcError::Decode(error.to_string())
    } else {
        RpcError::Transport(error.to_string())
    }
}

// JSON-RPC envelope types

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i64,
    message: String,
}
