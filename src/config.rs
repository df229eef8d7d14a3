//! Configuration for the pair monitor

use anyhow::{Context, Result};
use solana_sdk::commitment_config::CommitmentLevel;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::MonitorError;

/// Log keywords treated as important when no custom list is configured
pub const DEFAULT_IMPORTANT_KEYWORDS: &[&str] = &[
    "Instruction: Swap",
    "Instruction: Buy",
    "Instruction: Sell",
    "Instruction: Transfer",
    "Instruction: TransferChecked",
];

/// Decides whether a notification's log lines are worth a detail fetch
#[derive(Clone)]
pub enum Importance {
    /// Case-insensitive substring match against each log line.
    /// An empty list matches everything.
    Keywords(Vec<String>),
    /// Caller-supplied predicate over the raw log lines
    Custom(Arc<dyn Fn(&[String]) -> bool + Send + Sync>),
}

impl Importance {
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Importance::Keywords(keywords.into_iter().map(Into::into).collect())
    }

    /// Returns the first log line that makes the notification important.
    ///
    /// Custom predicates have no notion of a matching line, so the first
    /// log line (or an empty string) is returned when they accept.
    pub fn first_match(&self, logs: &[String]) -> Option<String> {
        match self {
            Importance::Keywords(keywords) if keywords.is_empty() => {
                Some(logs.first().cloned().unwrap_or_default())
            }
            Importance::Keywords(keywords) => {
                let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
                logs.iter()
                    .find(|line| {
                        let line = line.to_lowercase();
                        lowered.iter().any(|k| line.contains(k.as_str()))
                    })
                    .cloned()
            }
            Importance::Custom(predicate) => {
                if predicate(logs) {
                    Some(logs.first().cloned().unwrap_or_default())
                } else {
                    None
                }
            }
        }
    }
}

impl Default for Importance {
    fn default() -> Self {
        Importance::keywords(DEFAULT_IMPORTANT_KEYWORDS.iter().copied())
    }
}

impl fmt::Debug for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Importance::Keywords(k) => f.debug_tuple("Keywords").field(k).finish(),
            Importance::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Stream configuration. Immutable for the lifetime of one `start`.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    // Endpoints
    pub rpc_url: String,
    pub ws_url: String,
    pub commitment: CommitmentLevel,

    // Backfill
    pub backfill_page_size: usize,
    pub backfill_limit: usize,

    // Live path
    pub max_detail_concurrency: usize,
    pub importance: Importance,
    pub event_buffer: usize,
    pub seen_capacity: usize,

    // Timing
    pub rpc_timeout_ms: u64,
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub no_msg_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,
    pub probe_interval_ms: u64,

    // Persistence
    pub cursor_dir: PathBuf,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let rpc_url = "https://api.mainnet-beta.solana.com".to_string();
        Self {
            ws_url: derive_ws_url(&rpc_url),
            rpc_url,
            commitment: CommitmentLevel::Confirmed,
            backfill_page_size: 100,
            backfill_limit: 1000,
            max_detail_concurrency: 4,
            importance: Importance::default(),
            event_buffer: 1024,
            seen_capacity: 5000,
            rpc_timeout_ms: 10_000,
            ping_interval_ms: 15_000,
            pong_timeout_ms: 10_000,
            no_msg_timeout_ms: 60_000,
            backoff_base_ms: 1000,
            backoff_multiplier: 1.5,
            backoff_max_ms: 30_000,
            probe_interval_ms: 5000,
            cursor_dir: PathBuf::from(".cursors"),
        }
    }
}

impl StreamConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let rpc_url = std::env::var("SOLANA_RPC_URL").unwrap_or(defaults.rpc_url);
        let ws_url = std::env::var("SOLANA_WS_URL").unwrap_or_else(|_| derive_ws_url(&rpc_url));

        let commitment = match std::env::var("COMMITMENT") {
            Ok(raw) => CommitmentLevel::from_str(raw.trim())
                .map_err(|e| anyhow::anyhow!("{e:?}"))
                .with_context(|| format!("Invalid COMMITMENT: {raw}"))?,
            Err(_) => defaults.commitment,
        };

        let importance = match std::env::var("IMPORTANT_KEYWORDS") {
            Ok(raw) => Importance::keywords(
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string),
            ),
            Err(_) => defaults.importance,
        };

        let config = StreamConfig {
            rpc_url,
            ws_url,
            commitment,
            backfill_page_size: env_or("BACKFILL_PAGE_SIZE", defaults.backfill_page_size),
            backfill_limit: env_or("BACKFILL_LIMIT", defaults.backfill_limit),
            max_detail_concurrency: env_or("MAX_DETAIL_CONCURRENCY", defaults.max_detail_concurrency),
            importance,
            event_buffer: env_or("EVENT_BUFFER", defaults.event_buffer),
            seen_capacity: env_or("SEEN_CAPACITY", defaults.seen_capacity),
            rpc_timeout_ms: env_or("RPC_TIMEOUT_MS", defaults.rpc_timeout_ms),
            ping_interval_ms: env_or("PING_INTERVAL_MS", defaults.ping_interval_ms),
            pong_timeout_ms: env_or("PONG_TIMEOUT_MS", defaults.pong_timeout_ms),
            no_msg_timeout_ms: env_or("NO_MSG_TIMEOUT_MS", defaults.no_msg_timeout_ms),
            backoff_base_ms: env_or("BACKOFF_BASE_MS", defaults.backoff_base_ms),
            backoff_multiplier: env_or("BACKOFF_MULTIPLIER", defaults.backoff_multiplier),
            backoff_max_ms: env_or("BACKOFF_MAX_MS", defaults.backoff_max_ms),
            probe_interval_ms: env_or("PROBE_INTERVAL_MS", defaults.probe_interval_ms),
            cursor_dir: std::env::var("CURSOR_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cursor_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the stream loop misbehave
    pub fn validate(&self) -> std::result::Result<(), MonitorError> {
        if self.backfill_page_size == 0 {
            return Err(MonitorError::Validation("backfill_page_size must be > 0".into()));
        }
        if self.backfill_limit == 0 {
            return Err(MonitorError::Validation("backfill_limit must be > 0".into()));
        }
        if self.max_detail_concurrency == 0 {
            return Err(MonitorError::Validation("max_detail_concurrency must be > 0".into()));
        }
        if self.event_buffer == 0 {
            return Err(MonitorError::Validation("event_buffer must be > 0".into()));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(MonitorError::Validation("backoff_multiplier must be >= 1.0".into()));
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err(MonitorError::Validation(
                "backoff_base_ms must be > 0 and <= backoff_max_ms".into(),
            ));
        }
        if self.ping_interval_ms == 0 || self.pong_timeout_ms == 0 || self.no_msg_timeout_ms == 0 {
            return Err(MonitorError::Validation("heartbeat timings must be > 0".into()));
        }
        if self.pong_timeout_ms >= self.ping_interval_ms {
            tracing::warn!(
                ping_interval_ms = self.ping_interval_ms,
                pong_timeout_ms = self.pong_timeout_ms,
                "pong timeout is not shorter than the ping interval"
            );
        }
        Ok(())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn no_msg_timeout(&self) -> Duration {
        Duration::from_millis(self.no_msg_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Convert an HTTP(S) RPC endpoint into its PubSub WebSocket counterpart
pub fn derive_ws_url(rpc_url: &str) -> String {
    rpc_url
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
