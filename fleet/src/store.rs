//! Persistence seams used by the poller
//!
//! - `UptimeStore` keeps the first time each server was seen online, so
//!   uptime survives process restarts.
//! - `StatusSink` keeps the latest status row per server (upsert semantics).
//! - `EventSink` appends alerts and per-cycle cluster metrics.
//!
//! Each comes with an in-memory and a file-backed implementation. Uptime and
//! status writes are idempotent per key and the last write wins.

use crate::alerts::Alert;
use crate::model::{ClusterMetrics, ServerStatus, ServerStatusSnapshot};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-server uptime reference point.
///
/// The reference is the first time the server was observed with no
/// reference on record. It approximates time since tracking began, not
/// time since the server process started.
pub trait UptimeStore: Send + Sync {
    fn get(&self, server_key: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn set(&self, server_key: &str, reference: DateTime<Utc>) -> Result<(), StoreError>;

    /// Seconds since the reference, creating it (and returning 0) on first sight
    fn uptime_seconds(&self, server_key: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        match self.get(server_key)? {
            Some(reference) => Ok((now - reference).num_seconds().max(0) as u64),
            None => {
                self.set(server_key, now)?;
                Ok(0)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryUptimeStore {
    references: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryUptimeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UptimeStore for MemoryUptimeStore {
    fn get(&self, server_key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.references.lock().get(server_key).copied())
    }

    fn set(&self, server_key: &str, reference: DateTime<Utc>) -> Result<(), StoreError> {
        self.references.lock().insert(server_key.to_string(), reference);
        Ok(())
    }
}

/// One `uptime_<key>.dat` file per server holding Unix seconds
#[derive(Debug)]
pub struct FileUptimeStore {
    dir: PathBuf,
}

impl FileUptimeStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Distinct keys always map to distinct files: every byte outside
    /// `[A-Za-z0-9-]`, `_` included, is written as `_xx`.
    fn path_for(&self, server_key: &str) -> PathBuf {
        let mut safe = String::with_capacity(server_key.len());
        for byte in server_key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                safe.push(char::from(byte));
            } else {
                safe.push_str(&format!("_{:02x}", byte));
            }
        }
        self.dir.join(format!("uptime_{}.dat", safe))
    }
}

impl UptimeStore for FileUptimeStore {
    fn get(&self, server_key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let path = self.path_for(server_key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let parsed = text
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        if parsed.is_none() {
            // Treated as missing; the next set() overwrites it
            warn!("Ignoring corrupt uptime reference {:?}", path);
        }
        Ok(parsed)
    }

    fn set(&self, server_key: &str, reference: DateTime<Utc>) -> Result<(), StoreError> {
        let path = self.path_for(server_key);
        fs::write(&path, reference.timestamp().to_string())?;
        debug!("Uptime reference for {} set to {}", server_key, reference);
        Ok(())
    }
}

/// Latest persisted status of one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub server_key: String,
    pub status: ServerStatus,
    pub players_online: u32,
    pub ping_ms: u64,
    pub uptime_seconds: u64,
    pub last_updated: DateTime<Utc>,
}

impl From<&ServerStatusSnapshot> for StatusRow {
    fn from(snapshot: &ServerStatusSnapshot) -> Self {
        Self {
            server_key: snapshot.server_key.clone(),
            status: snapshot.status,
            players_online: snapshot.player_count,
            ping_ms: snapshot.ping_ms,
            uptime_seconds: snapshot.uptime_seconds,
            last_updated: snapshot.timestamp,
        }
    }
}

/// Keeps at most one current row per server key
pub trait StatusSink: Send + Sync {
    /// Inserts the row, or replaces the existing row with the same key
    fn upsert(&self, row: &StatusRow) -> Result<(), StoreError>;

    fn get(&self, server_key: &str) -> Result<Option<StatusRow>, StoreError>;

    /// All rows, ordered by server key
    fn rows(&self) -> Result<Vec<StatusRow>, StoreError>;

    /// Upserts a whole cycle's rows
    fn upsert_all(&self, rows: &[StatusRow]) -> Result<(), StoreError> {
        rows.iter().try_for_each(|row| self.upsert(row))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    rows: Mutex<BTreeMap<String, StatusRow>>,
}

impl MemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusSink for MemoryStatusSink {
    fn upsert(&self, row: &StatusRow) -> Result<(), StoreError> {
        self.rows.lock().insert(row.server_key.clone(), row.clone());
        Ok(())
    }

    fn get(&self, server_key: &str) -> Result<Option<StatusRow>, StoreError> {
        Ok(self.rows.lock().get(server_key).cloned())
    }

    fn rows(&self) -> Result<Vec<StatusRow>, StoreError> {
        Ok(self.rows.lock().values().cloned().collect())
    }
}

/// Status table kept as a JSON object keyed by server key.
///
/// Rows are cached in memory; every upsert rewrites the file through a
/// temporary file and a rename so readers never see a partial table.
#[derive(Debug)]
pub struct JsonFileStatusSink {
    path: PathBuf,
    rows: Mutex<BTreeMap<String, StatusRow>>,
}

impl JsonFileStatusSink {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        let rows: BTreeMap<String, StatusRow> = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Loaded {} status rows from {:?}", rows.len(), path);
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, rows: &BTreeMap<String, StatusRow>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(rows)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StatusSink for JsonFileStatusSink {
    fn upsert(&self, row: &StatusRow) -> Result<(), StoreError> {
        // Lock held across the write so concurrent upserts don't interleave
        let mut rows = self.rows.lock();
        rows.insert(row.server_key.clone(), row.clone());
        self.save(&rows)?;
        debug!("Upserted status row for {}", row.server_key);
        Ok(())
    }

    fn upsert_all(&self, batch: &[StatusRow]) -> Result<(), StoreError> {
        let mut rows = self.rows.lock();
        for row in batch {
            rows.insert(row.server_key.clone(), row.clone());
        }
        self.save(&rows)?;
        debug!("Upserted {} status rows", batch.len());
        Ok(())
    }

    fn get(&self, server_key: &str) -> Result<Option<StatusRow>, StoreError> {
        Ok(self.rows.lock().get(server_key).cloned())
    }

    fn rows(&self) -> Result<Vec<StatusRow>, StoreError> {
        Ok(self.rows.lock().values().cloned().collect())
    }
}

/// One entry in the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventRecord {
    Alert(Alert),
    Metrics(ClusterMetrics),
}

/// Append-only record of alerts and cycle metrics
pub trait EventSink: Send + Sync {
    fn record(&self, event: &EventRecord) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<EventRecord>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, oldest first
    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().clone()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: &EventRecord) -> Result<(), StoreError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Appends one JSON object per line
#[derive(Debug)]
pub struct JsonLinesEventSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesEventSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonLinesEventSink {
    fn record(&self, event: &EventRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
