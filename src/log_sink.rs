//! Deployment log
//!
//! Operational events go to two places: the append-only JSON-lines
//! `deployment.log` (tailed by the SSE endpoint and readable by shell
//! tools on the host) and an indexed sled tree the `/logs` endpoint
//! queries. Shell scripts on the host append their own lines to the
//! file; a sync worker folds those into the tree by byte offset.

use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{HubError, HubResult};

pub const LOGS_TREE: &str = "logs";
pub const SYNC_INTERVAL_SECS: u64 = 10;
const QUERY_LIMIT: usize = 100;
const SOURCE_API: &str = "api";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub service: Option<String>,
    #[serde(default)]
    pub source: String,
}

pub struct LogSink {
    log_file: PathBuf,
    tree: sled::Tree,
    db: sled::Db,
    /// Serializes file appends and the sync cursor.
    file_state: Mutex<u64>,
}

impl LogSink {
    pub fn new(log_file: PathBuf, db: sled::Db) -> HubResult<Self> {
        let tree = db.open_tree(LOGS_TREE)?;
        // External lines already on disk predate this process; the sync
        // cursor starts at the current end of file.
        let offset = std::fs::metadata(&log_file).map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            log_file,
            tree,
            db,
            file_state: Mutex::new(offset),
        })
    }

    fn index(&self, entry: &LogEntry) -> HubResult<()> {
        let key = self.db.generate_id()?.to_be_bytes();
        let value = serde_json::to_vec(entry)
            .map_err(|e| HubError::serialization("log entry", e))?;
        self.tree.insert(key, value)?;
        Ok(())
    }

    /// Record an event from this process: appended to the file and
    /// indexed in one call.
    pub fn record(
        &self,
        level: &str,
        category: &str,
        message: impl Into<String>,
        service: Option<&str>,
    ) -> HubResult<()> {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: level.to_string(),
            category: category.to_string(),
            message: message.into(),
            service: service.map(str::to_string),
            source: SOURCE_API.to_string(),
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| HubError::serialization("log entry", e))?;
        {
            let mut offset = self.file_state.lock().map_err(|_| HubError::MutexPoisoned {
                resource: "deployment log".into(),
            })?;
            if let Some(parent) = self.log_file.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| HubError::io("create log dir", e))?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)
                .map_err(|e| HubError::io("open deployment log", e))?;
            file.write_all(line.as_bytes())
                .and_then(|_| file.write_all(b"\n"))
                .map_err(|e| HubError::io("append deployment log", e))?;
            // Our own bytes never need re-ingesting.
            *offset += line.len() as u64 + 1;
        }
        self.index(&entry)
    }

    pub fn info(&self, category: &str, message: impl Into<String>, service: Option<&str>) {
        if let Err(err) = self.record("info", category, message, service) {
            warn!(%err, "failed to record log entry");
        }
    }

    pub fn success(&self, category: &str, message: impl Into<String>, service: Option<&str>) {
        if let Err(err) = self.record("success", category, message, service) {
            warn!(%err, "failed to record log entry");
        }
    }

    pub fn warning(&self, category: &str, message: impl Into<String>, service: Option<&str>) {
        if let Err(err) = self.record("warning", category, message, service) {
            warn!(%err, "failed to record log entry");
        }
    }

    pub fn error(&self, category: &str, message: impl Into<String>, service: Option<&str>) {
        if let Err(err) = self.record("error", category, message, service) {
            warn!(%err, "failed to record log entry");
        }
    }

    /// Last 100 matching entries in chronological order.
    pub fn query(&self, level: Option<&str>, category: Option<&str>) -> HubResult<Vec<LogEntry>> {
        let mut entries = Vec::with_capacity(QUERY_LIMIT);
        for item in self.tree.iter().rev() {
            let (_, value) = item?;
            let entry: LogEntry = match serde_json::from_slice(&value) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if let Some(level) = level {
                if entry.level != level {
                    continue;
                }
            }
            if let Some(category) = category {
                if entry.category != category {
                    continue;
                }
            }
            entries.push(entry);
            if entries.len() == QUERY_LIMIT {
                break;
            }
        }
        entries.reverse();
        Ok(entries)
    }

    /// Ingest lines appended to the file by external writers since the
    /// last pass. Lines this process wrote carry `"source":"api"` and
    /// are skipped.
    pub fn sync_external(&self) -> HubResult<usize> {
        let mut offset = self.file_state.lock().map_err(|_| HubError::MutexPoisoned {
            resource: "deployment log".into(),
        })?;
        let len = match std::fs::metadata(&self.log_file) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(0),
        };
        if len < *offset {
            // Truncated or rotated underneath us.
            *offset = 0;
        }
        if len == *offset {
            return Ok(0);
        }
        let file = std::fs::File::open(&self.log_file)
            .map_err(|e| HubError::io("open deployment log", e))?;
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(*offset))
            .map_err(|e| HubError::io("seek deployment log", e))?;
        let mut ingested = 0usize;
        let mut consumed = 0u64;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| HubError::io("read deployment log", e))?;
            if read == 0 {
                break;
            }
            // Hold back a trailing partial line for the next pass.
            if !line.ends_with('\n') {
                break;
            }
            consumed += read as u64;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(trimmed) {
                Ok(entry) if entry.source != SOURCE_API => {
                    self.index(&entry)?;
                    ingested += 1;
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "skipping unparseable log line"),
            }
        }
        *offset += consumed;
        Ok(ingested)
    }

    pub fn log_file(&self) -> &std::path::Path {
        &self.log_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(dir: &tempfile::TempDir) -> LogSink {
        let db = sled::Config::new()
            .path(dir.path().join("db"))
            .temporary(true)
            .open()
            .unwrap();
        LogSink::new(dir.path().join("deployment.log"), db).unwrap()
    }

    #[test]
    fn record_appends_a_line_and_indexes_it() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir);
        sink.record("info", "update", "started", Some("redlib")).unwrap();

        let content = std::fs::read_to_string(sink.log_file()).unwrap();
        assert_eq!(content.lines().count(), 1);
        let on_disk: LogEntry = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(on_disk.source, "api");

        let entries = sink.query(None, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "started");
    }

    #[test]
    fn sync_ingests_external_lines_and_skips_own() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir);
        sink.record("info", "update", "ours", None).unwrap();

        let external = serde_json::json!({
            "timestamp": Utc::now(),
            "level": "info",
            "category": "backup",
            "message": "nightly backup done",
            "source": "cron"
        });
        let mut content = std::fs::read_to_string(sink.log_file()).unwrap();
        content.push_str(&format!("{external}\n"));
        content.push_str("not json at all\n");
        std::fs::write(sink.log_file(), content).unwrap();

        // Only the appended external line is new relative to the cursor.
        assert_eq!(sink.sync_external().unwrap(), 1);
        assert_eq!(sink.sync_external().unwrap(), 0);

        let entries = sink.query(None, Some("backup")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "cron");
    }

    #[test]
    fn query_filters_by_level_and_category() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir);
        sink.record("info", "update", "a", None).unwrap();
        sink.record("error", "update", "b", None).unwrap();
        sink.record("error", "auth", "c", None).unwrap();

        assert_eq!(sink.query(Some("error"), None).unwrap().len(), 2);
        assert_eq!(sink.query(Some("error"), Some("update")).unwrap().len(), 1);
        assert_eq!(sink.query(None, None).unwrap().len(), 3);
    }
}

/// Periodic ingest of externally written log lines.
pub fn spawn_log_sync(sink: std::sync::Arc<LogSink>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SYNC_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match sink.sync_external() {
                Ok(0) => {}
                Ok(count) => debug!(count, "ingested external log lines"),
                Err(err) => warn!(%err, "log sync pass failed"),
            }
        }
    })
}
