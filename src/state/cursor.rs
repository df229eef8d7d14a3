//! Durable per-pair cursor surviving process restarts

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use solana_sdk::hash::hashv;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::stream::MonitoredPair;

/// Last processed ledger position for a pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub last_position: u64,
    pub last_identifier: Option<String>,
}

impl Cursor {
    /// Move the cursor forward. Never lowers `last_position`.
    /// Returns `true` if the cursor changed.
    pub fn advance(&mut self, position: u64, identifier: &str) -> bool {
        if position < self.last_position {
            return false;
        }
        if position == self.last_position && self.last_identifier.is_some() {
            return false;
        }
        self.last_position = position;
        self.last_identifier = Some(identifier.to_string());
        true
    }
}

/// Storage for per-pair cursors
pub trait CursorStore: Send + Sync {
    /// Load the cursor for `pair`. Missing records load as the empty cursor.
    fn load(&self, pair: &MonitoredPair) -> Result<Cursor>;

    fn save(&self, pair: &MonitoredPair, cursor: &Cursor) -> Result<()>;
}

/// Collision-free key over both full identifiers
pub fn cursor_key(pair: &MonitoredPair) -> String {
    let digest = hashv(&[pair.account().as_bytes(), b":", pair.asset().as_bytes()]);
    hex::encode(digest.to_bytes())
}

/// On-disk record
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorRecord {
    account: String,
    asset: String,
    #[serde(flatten)]
    cursor: Cursor,
    updated_at: DateTime<Utc>,
}

/// Distinguishes temp files of concurrent writers
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One JSON file per pair under a directory
pub struct FileCursorStore {
    dir: PathBuf,
}

impl FileCursorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, pair: &MonitoredPair) -> PathBuf {
        self.dir.join(format!("cursor-{}.json", cursor_key(pair)))
    }

    fn read_record(path: &Path) -> Result<CursorRecord> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cursor file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse cursor file {}", path.display()))
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, pair: &MonitoredPair) -> Result<Cursor> {
        let path = self.path_for(pair);
        if !path.exists() {
            debug!(path = %path.display(), "no stored cursor");
            return Ok(Cursor::default());
        }

        match Self::read_record(&path) {
            Ok(record) if record.account == pair.account() && record.asset == pair.asset() => {
                Ok(record.cursor)
            }
            Ok(record) => {
                warn!(
                    path = %path.display(),
                    stored_account = %record.account,
                    stored_asset = %record.asset,
                    "cursor file belongs to another pair, ignoring"
                );
                Ok(Cursor::default())
            }
            Err(e) => {
                warn!(path = %path.display(), error = ?e, "corrupt cursor file, starting from scratch");
                Ok(Cursor::default())
            }
        }
    }

    fn save(&self, pair: &MonitoredPair, cursor: &Cursor) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cursor dir {}", self.dir.display()))?;

        let record = CursorRecord {
            account: pair.account().to_string(),
            asset: pair.asset().to_string(),
            cursor: cursor.clone(),
            updated_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&record).context("Failed to serialize cursor")?;

        let path = self.path_for(pair);
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}.{seq}.tmp", std::process::id()));
        fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!(path = %path.display(), last_position = cursor.last_position, "cursor saved");
        Ok(())
    }
}

/// Process-local store, for embedding and tests
#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<String, Cursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, pair: &MonitoredPair) -> Result<Cursor> {
        Ok(self
            .cursors
            .lock()
            .get(&cursor_key(pair))
            .cloned()
            .unwrap_or_default())
    }

    fn save(&self, pair: &MonitoredPair, cursor: &Cursor) -> Result<()> {
        self.cursors.lock().insert(cursor_key(pair), cursor.clone());
        Ok(())
    }
}
