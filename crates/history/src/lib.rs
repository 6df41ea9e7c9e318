//! Conversation history store.
//!
//! Persists finished dialogues as a JSON array in `chat_histories.json`
//! under the per-user data directory. Adding a record with the same identity
//! (kind + participating model/provider pairs) replaces the existing record
//! in place; retention is capped FIFO at [`MAX_HISTORY`] records, trimmed on
//! save. Writes go through a temp file and an atomic rename.

use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use pl_domain::error::Result;

/// Maximum records kept on disk; the oldest beyond this are dropped on save.
pub const MAX_HISTORY: usize = 1000;

/// History file name under the per-user data directory.
pub const HISTORY_FILE: &str = "chat_histories.json";

/// Timestamp format used in record fields.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What kind of dialogue a record captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    #[default]
    Chat,
    Discussion,
    Debate,
    Batch,
}

impl HistoryKind {
    pub fn label(self) -> &'static str {
        match self {
            HistoryKind::Chat => "Chat",
            HistoryKind::Discussion => "Discussion",
            HistoryKind::Debate => "Debate",
            HistoryKind::Batch => "Batch",
        }
    }
}

/// One finished dialogue. Field names are the on-disk JSON contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub topic: String,
    pub model1: String,
    #[serde(default)]
    pub model2: Option<String>,
    pub api1: String,
    #[serde(default)]
    pub api2: String,
    pub rounds: u32,
    /// Rendered transcript.
    pub chat_content: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub kind: HistoryKind,
}

impl HistoryRecord {
    /// Single-participant records carry no second model.
    fn is_single(&self) -> bool {
        self.model2.as_deref().map_or(true, str::is_empty)
    }

    /// Identity check for replace-in-place.
    ///
    /// Chat-like records match on (model1, api1). Two-agent records match
    /// the (model, api) pair set in either orientation, so A-vs-B and
    /// B-vs-A update the same entry.
    fn same_identity(&self, other: &HistoryRecord) -> bool {
        if self.kind != other.kind {
            return false;
        }
        if self.is_single() || other.is_single() {
            return self.is_single() == other.is_single()
                && self.model1 == other.model1
                && self.api1 == other.api1;
        }
        let straight = self.model1 == other.model1
            && self.api1 == other.api1
            && self.model2 == other.model2
            && self.api2 == other.api2;
        let crossed = Some(self.model1.as_str()) == other.model2.as_deref()
            && self.api1 == other.api2
            && self.model2.as_deref() == Some(other.model1.as_str())
            && self.api2 == other.api1;
        straight || crossed
    }
}

/// Display label for a dialogue: `【Kind】topic time`.
pub fn formatted_topic(kind: HistoryKind, topic: Option<&str>) -> String {
    let stamp = Local::now().format(TIME_FORMAT);
    match topic {
        Some(t) if !t.is_empty() => format!("【{}】{t} {stamp}", kind.label()),
        _ => format!("【{}】{stamp}", kind.label()),
    }
}

/// Current local time in the record format.
pub fn now_string() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// History store backed by one JSON file.
pub struct HistoryStore {
    path: PathBuf,
    records: Mutex<Vec<HistoryRecord>>,
}

impl HistoryStore {
    /// Load the store. A malformed file is logged and treated as empty; the
    /// file itself is left in place until the next save.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<Vec<HistoryRecord>>(&raw) {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e,
                            "history file malformed, starting empty");
                        Vec::new()
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e,
                        "history file unreadable, starting empty");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        tracing::info!(path = %path.display(), records = records.len(), "history loaded");
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    /// Load from the default per-user location.
    pub fn load_default() -> Self {
        Self::load(pl_domain::config::user_data_dir().join(HISTORY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a record: replace the matching-identity record in place
    /// (preserving its position), or append. Persists immediately.
    pub fn add(&self, record: HistoryRecord) -> Result<()> {
        {
            let mut records = self.records.lock();
            match records.iter().position(|r| r.same_identity(&record)) {
                Some(i) => records[i] = record,
                None => records.push(record),
            }
        }
        self.save()
    }

    /// Trim to the most recent [`MAX_HISTORY`] and write atomically.
    pub fn save(&self) -> Result<()> {
        let json = {
            let mut records = self.records.lock();
            if records.len() > MAX_HISTORY {
                let excess = records.len() - MAX_HISTORY;
                records.drain(..excess);
                tracing::info!(dropped = excess, "trimmed old history records");
            }
            serde_json::to_string_pretty(&*records)?
        };

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)?;

        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        std::fs::write(tmp.path(), json)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Page over the in-memory list, cloned out so the lock is not held.
    pub fn page(&self, offset: usize, size: usize) -> Vec<HistoryRecord> {
        let records = self.records.lock();
        records.iter().skip(offset).take(size).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// First record whose topic matches exactly.
    pub fn get_by_topic(&self, topic: &str) -> Option<HistoryRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.topic == topic)
            .cloned()
    }

    /// Delete by index. Returns whether a record was removed.
    pub fn delete(&self, index: usize) -> Result<bool> {
        let removed = {
            let mut records = self.records.lock();
            if index < records.len() {
                records.remove(index);
                true
            } else {
                false
            }
        };
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Empty the in-memory list and the on-disk copy.
    pub fn clear(&self) -> Result<()> {
        self.records.lock().clear();
        self.save()
    }

    /// Write a copy of the current records to another path.
    pub fn export(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.records.lock())?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "history exported");
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
