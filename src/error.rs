//! Error types for the pair monitor

use thiserror::Error;

/// Failure of a single JSON-RPC attempt
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Non-success HTTP status
    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },

    /// JSON-RPC error object in the response
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors surfaced to callers of `PairMonitor::start` / `set_pair`
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Malformed pair or config; raised before any network action
    #[error("validation failed: {0}")]
    Validation(String),

    /// Connectivity check failed at start
    #[error("connectivity probe failed: {0}")]
    Probe(#[source] RpcError),

    #[error("cursor store error: {0}")]
    Store(String),
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
