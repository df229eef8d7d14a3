//! Core stream data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MonitorError;

/// The (account, asset) tuple being monitored
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitoredPair {
    account: String,
    asset: String,
}

impl MonitoredPair {
    /// Validate both identifiers. Nothing touches the network before this passes.
    pub fn new(account: impl Into<String>, asset: impl Into<String>) -> Result<Self, MonitorError> {
        let account = account.into().trim().to_string();
        let asset = asset.into().trim().to_string();

        validate_identifier("account", &account)?;
        validate_identifier("asset", &asset)?;

        Ok(Self { account, asset })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    /// Short form for log lines
    pub fn short(&self) -> String {
        format!("{}/{}", abbreviate(&self.account), abbreviate(&self.asset))
    }
}

impl fmt::Display for MonitoredPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.asset)
    }
}

/// Base58, 32 to 44 characters
fn validate_identifier(field: &str, value: &str) -> Result<(), MonitorError> {
    if value.is_empty() {
        return Err(MonitorError::Validation(format!("{field} is required")));
    }
    if !(32..=44).contains(&value.len()) {
        return Err(MonitorError::Validation(format!(
            "{field} must be 32-44 characters, got {}",
            value.len()
        )));
    }
    bs58::decode(value)
        .into_vec()
        .map_err(|e| MonitorError::Validation(format!("{field} is not valid base58: {e}")))?;
    Ok(())
}

fn abbreviate(value: &str) -> &str {
    value.get(..8).unwrap_or(value)
}

/// Where an event was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Backfill,
    Stream,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Backfill => write!(f, "backfill"),
            Origin::Stream => write!(f, "stream"),
        }
    }
}

/// A transaction that touched both entities of the pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Always `"event"`
    pub kind: String,
    pub origin: Origin,
    pub pair: MonitoredPair,
    /// Slot the transaction landed in
    pub position: u64,
    /// Transaction signature
    pub identifier: String,
    /// Rendered transaction error, if the transaction failed
    pub error: Option<String>,
    pub note: String,
    pub emitted_at: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(
        origin: Origin,
        pair: MonitoredPair,
        position: u64,
        identifier: impl Into<String>,
        error: Option<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            kind: "event".to_string(),
            origin,
            pair,
            position,
            identifier: identifier.into(),
            error,
            note: note.into(),
            emitted_at: Utc::now(),
        }
    }
}

/// Connection lifecycle, owned by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}
