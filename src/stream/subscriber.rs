//! Live log subscription: wire messages and notification dispatch

use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::commitment_config::CommitmentConfig;
use std::sync::Arc;
use tracing::{debug, warn};

use super::context::RunContext;
use super::types::{MonitoredPair, Origin};
use super::verify::{touches_pair, transaction_error};

/// Request id used for the single subscription on each connection
pub const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// `logsSubscribe` request scoped to both identifiers of the pair
pub fn subscribe_request(pair: &MonitoredPair, commitment: CommitmentConfig) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": SUBSCRIBE_REQUEST_ID,
        "method": "logsSubscribe",
        "params": [
            { "mentions": [pair.account(), pair.asset()] },
            commitment,
        ]
    })
}

/// A parsed inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Subscription acknowledged
    Subscribed { subscription: u64 },
    /// Subscription request rejected by the node
    Rejected { code: i64, message: String },
    Notification(LogNotification),
    /// Valid JSON we have no use for
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogNotification {
    pub slot: u64,
    pub signature: String,
    pub err: Option<String>,
    pub logs: Vec<String>,
}

// Wire shapes

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    params: Option<NotificationParams>,
}

#[derive(Deserialize)]
struct WireError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct NotificationParams {
    result: NotificationResult,
}

#[derive(Deserialize)]
struct NotificationResult {
    context: SlotContext,
    value: LogsValue,
}

#[derive(Deserialize)]
struct SlotContext {
    slot: u64,
}

#[derive(Deserialize)]
struct LogsValue {
    signature: String,
    #[serde(default)]
    err: Option<Value>,
    #[serde(default)]
    logs: Vec<String>,
}

/// Parse one text frame. Errors are for logging only; the caller discards the frame.
pub fn parse_message(text: &str) -> Result<Inbound, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;

    if envelope.method.as_deref() == Some("logsNotification") {
        let Some(params) = envelope.params else {
            return Ok(Inbound::Ignored);
        };
        let value = params.result.value;
        return Ok(Inbound::Notification(LogNotification {
            slot: params.result.context.slot,
            signature: value.signature,
            err: value.err.filter(|e| !e.is_null()).map(|e| e.to_string()),
            logs: value.logs,
        }));
    }

    if envelope.id == Some(SUBSCRIBE_REQUEST_ID) {
        if let Some(error) = envelope.error {
            return Ok(Inbound::Rejected {
                code: error.code,
                message: error.message,
            });
        }
        if let Some(subscription) = envelope.result.as_ref().and_then(Value::as_u64) {
            return Ok(Inbound::Subscribed { subscription });
        }
    }

    Ok(Inbound::Ignored)
}

/// What happened to a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Importance predicate did not match
    Unimportant,
    /// Identifier already emitted in this run
    Duplicate,
    /// Detail-fetch limit reached; notification shed
    Dropped,
    /// Detail fetch started
    Admitted,
}

/// Filter a notification and, if admitted, verify and emit it in the background
pub fn dispatch(ctx: &Arc<RunContext>, notification: LogNotification) -> Dispatch {
    let Some(note) = ctx.config.importance.first_match(&notification.logs) else {
        return Dispatch::Unimportant;
    };

    if ctx.is_seen(&notification.signature) {
        return Dispatch::Duplicate;
    }

    let Some(guard) = ctx.try_admit() else {
        debug!(
            signature = %notification.signature,
            in_flight = ctx.in_flight(),
            "detail fetch limit reached, dropping notification"
        );
        return Dispatch::Dropped;
    };

    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        let _guard = guard;
        verify_and_emit(&ctx, notification, note).await;
    });

    Dispatch::Admitted
}

async fn verify_and_emit(ctx: &RunContext, notification: LogNotification, note: String) {
    let tx = match ctx.rpc.get_transaction(&notification.signature).await {
        Ok(tx) => tx,
        Err(e) => {
            warn!(signature = %notification.signature, error = %e, "detail fetch failed");
            return;
        }
    };

    if !touches_pair(&tx, &ctx.pair) {
        debug!(signature = %notification.signature, "pair not present in transaction");
        return;
    }

    let error = transaction_error(&tx).or(notification.err);
    ctx.emit(Origin::Stream, notification.slot, &notification.signature, error, note);
}
