//! Backing stores for the session log.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};

use super::{PersistenceError, SessionLogEntry};
use crate::classifier::Emotion;

const CSV_HEADER: &str = "timestamp_utc,emotion";

/// Append-only storage for session log entries
pub trait TrendStore: Send {
    /// Durably append one entry after all previous ones
    fn append(&mut self, entry: &SessionLogEntry) -> Result<(), PersistenceError>;

    /// Read every stored entry, oldest first
    fn load_all(&self) -> Result<Vec<SessionLogEntry>, PersistenceError>;
}

/// Store with no durability. Appends are accepted and dropped; the
/// tracker's own cache is the only copy of the session.
#[derive(Debug, Default)]
pub struct MemoryTrendStore;

impl MemoryTrendStore {
    pub fn new() -> Self {
        Self
    }
}

impl TrendStore for MemoryTrendStore {
    fn append(&mut self, _entry: &SessionLogEntry) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<SessionLogEntry>, PersistenceError> {
        Ok(Vec::new())
    }
}

/// CSV log, one `timestamp_utc,emotion` row per classification
#[derive(Debug)]
pub struct CsvTrendStore {
    path: PathBuf,
}

impl CsvTrendStore {
    /// Open the log at `path`, creating its directory if needed. The file
    /// itself is created on first append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        info!("Session log: {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl TrendStore for CsvTrendStore {
    fn append(&mut self, entry: &SessionLogEntry) -> Result<(), PersistenceError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        let write_header = file.metadata().map_err(|e| self.io_error(e))?.len() == 0;
        let mut row = String::new();
        if write_header {
            row.push_str(CSV_HEADER);
            row.push('\n');
        }
        row.push_str(&format!(
            "{},{}\n",
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            entry.label
        ));

        // Single write per row keeps concurrent appenders from interleaving
        file.write_all(row.as_bytes()).map_err(|e| self.io_error(e))?;
        file.flush().map_err(|e| self.io_error(e))
    }

    fn load_all(&self) -> Result<Vec<SessionLogEntry>, PersistenceError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut entries = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line == CSV_HEADER {
                continue;
            }
            match parse_row(line) {
                Some(entry) => entries.push(entry),
                None => warn!("Skipping malformed session log line {}: {:?}", line_no + 1, line),
            }
        }
        Ok(entries)
    }
}

fn parse_row(line: &str) -> Option<SessionLogEntry> {
    let (timestamp, label) = line.split_once(',')?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp.trim())
        .ok()?
        .with_timezone(&Utc);
    let label: Emotion = label.parse().ok()?;
    Some(SessionLogEntry { timestamp, label })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(secs: i64, label: Emotion) -> SessionLogEntry {
        SessionLogEntry {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            label,
        }
    }

    #[test]
    fn test_csv_roundtrip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CsvTrendStore::open(dir.path().join("logs/session.csv")).unwrap();

        let written = vec![
            entry(0, Emotion::Happy),
            entry(1, Emotion::Sad),
            entry(2, Emotion::Happy),
        ];
        for e in &written {
            store.append(e).unwrap();
        }

        assert_eq!(store.load_all().unwrap(), written);
    }

    #[test]
    fn test_csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.csv");
        let mut store = CsvTrendStore::open(&path).unwrap();
        store.append(&entry(0, Emotion::Calm)).unwrap();
        store.append(&entry(1, Emotion::Angry)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].ends_with(",calm"));
        assert!(lines[2].ends_with(",angry"));
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvTrendStore::open(dir.path().join("never-written.csv")).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.csv");
        std::fs::write(
            &path,
            "timestamp_utc,emotion\n\
             2024-01-01T10:00:00.000Z,happy\n\
             not a row\n\
             2024-01-01T10:00:05.000Z,bored\n\
             2024-01-01T10:00:09.000Z,sad\n",
        )
        .unwrap();

        let store = CsvTrendStore::open(&path).unwrap();
        let labels: Vec<Emotion> = store.load_all().unwrap().iter().map(|e| e.label).collect();
        assert_eq!(labels, vec![Emotion::Happy, Emotion::Sad]);
    }

    #[test]
    fn test_unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending
        let mut store = CsvTrendStore::open(dir.path()).unwrap();
        let result = store.append(&entry(0, Emotion::Neutral));
        assert!(matches!(result, Err(PersistenceError::Io { .. })));
    }

    #[test]
    fn test_memory_store_keeps_nothing() {
        let mut store = MemoryTrendStore::new();
        store.append(&entry(0, Emotion::Fearful)).unwrap();
        store.append(&entry(1, Emotion::Disgust)).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }
}
