//! Typed wrappers for the RPC methods the monitor needs

use serde_json::{json, Value};
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use std::sync::Arc;
use std::time::Duration;

use super::client::RpcTransport;
use crate::error::RpcError;

pub const METHOD_GET_HEALTH: &str = "getHealth";
pub const METHOD_GET_SIGNATURES: &str = "getSignaturesForAddress";
pub const METHOD_GET_TRANSACTION: &str = "getTransaction";

/// Solana RPC facade bound to one transport, timeout and commitment
#[derive(Clone)]
pub struct SolanaRpc {
    transport: Arc<dyn RpcTransport>,
    timeout: Duration,
    commitment: CommitmentLevel,
}

impl SolanaRpc {
    pub fn new(transport: Arc<dyn RpcTransport>, timeout: Duration, commitment: CommitmentLevel) -> Self {
        Self {
            transport,
            timeout,
            commitment,
        }
    }

    /// Lightweight connectivity probe
    pub async fn get_health(&self) -> Result<(), RpcError> {
        self.transport
            .call(METHOD_GET_HEALTH, json!([]), self.timeout)
            .await
            .map(|_| ())
    }

    /// One page of signatures for `address`, newest first
    pub async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>, RpcError> {
        let mut options = json!({
            "limit": limit,
            "commitment": detail_commitment(self.commitment),
        });
        if let Some(before) = before {
            options["before"] = Value::String(before.to_string());
        }

        let result = self
            .transport
            .call(METHOD_GET_SIGNATURES, json!([address, options]), self.timeout)
            .await?;

        serde_json::from_value(result).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Full parsed transaction. A `null` result (not yet available) is an error.
    pub async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta, RpcError> {
        let tx_config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig {
                commitment: detail_commitment(self.commitment),
            }),
            max_supported_transaction_version: Some(0),
        };
        let config = serde_json::to_value(tx_config).map_err(|e| RpcError::Decode(e.to_string()))?;

        let result = self
            .transport
            .call(METHOD_GET_TRANSACTION, json!([signature, config]), self.timeout)
            .await?;

        if result.is_null() {
            return Err(RpcError::Decode(format!("transaction {signature} not available")));
        }

        serde_json::from_value(result).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

/// History and detail lookups reject `processed`
fn detail_commitment(level: CommitmentLevel) -> CommitmentLevel {
    if level == CommitmentLevel::Processed {
        CommitmentLevel::Confirmed
    } else {
        level
    }
}
