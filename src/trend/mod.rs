//! Session emotion trend.
//!
//! Every classification is appended to an ordered, append-only log of
//! (timestamp, emotion) pairs that front-ends read back in full to chart how
//! a session evolved.

pub mod store;

pub use store::{CsvTrendStore, MemoryTrendStore, TrendStore};

use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::classifier::{Emotion, NUM_EMOTIONS};

/// Errors from the session log backing store
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Session log I/O failed at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session log unavailable: {0}")]
    Unavailable(String),
}

/// One classification in the session log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub label: Emotion,
}

/// Snapshot of the session log, oldest entry first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub entries: Vec<SessionLogEntry>,
}

impl Trend {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&SessionLogEntry> {
        self.entries.last()
    }

    pub fn labels(&self) -> impl Iterator<Item = Emotion> + '_ {
        self.entries.iter().map(|e| e.label)
    }

    /// Occurrences of each emotion, in label order
    pub fn counts(&self) -> [usize; NUM_EMOTIONS] {
        let mut counts = [0; NUM_EMOTIONS];
        for label in self.labels() {
            counts[label.index()] += 1;
        }
        counts
    }

    /// Most frequent emotion; ties go to the earlier label
    pub fn dominant(&self) -> Option<Emotion> {
        let counts = self.counts();
        let mut best: Option<(Emotion, usize)> = None;
        for emotion in Emotion::ALL {
            let n = counts[emotion.index()];
            if n > 0 && best.map_or(true, |(_, b)| n > b) {
                best = Some((emotion, n));
            }
        }
        best.map(|(e, _)| e)
    }
}

/// Append-only session trend backed by a [`TrendStore`].
///
/// `record` calls are serialized so entries land in call order with
/// non-decreasing timestamps. `trend` returns a consistent snapshot and may
/// run alongside an append.
pub struct SessionTrendTracker {
    store: Mutex<Box<dyn TrendStore>>,
    entries: RwLock<Vec<SessionLogEntry>>,
}

impl SessionTrendTracker {
    /// Open a tracker, replaying whatever the store already holds
    pub fn open(store: impl TrendStore + 'static) -> Result<Self, PersistenceError> {
        let existing = store.load_all()?;
        if !existing.is_empty() {
            info!("Restored {} session log entries", existing.len());
        }
        Ok(Self {
            store: Mutex::new(Box::new(store)),
            entries: RwLock::new(existing),
        })
    }

    /// Tracker that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            store: Mutex::new(Box::new(MemoryTrendStore::new())),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Append `label` with the current time.
    ///
    /// On failure the entry is dropped and the trend is unchanged.
    pub fn record(&self, label: Emotion) -> Result<SessionLogEntry, PersistenceError> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| PersistenceError::Unavailable("store lock poisoned".to_string()))?;

        let mut timestamp = Utc::now();
        if let Some(last) = self.read_entries().last() {
            // Wall clock stepped backwards; keep the log ordered
            timestamp = timestamp.max(last.timestamp);
        }
        let entry = SessionLogEntry { timestamp, label };

        store.append(&entry)?;

        match self.entries.write() {
            Ok(mut entries) => entries.push(entry.clone()),
            Err(poisoned) => poisoned.into_inner().push(entry.clone()),
        }

        debug!("Recorded {} at {}", entry.label, entry.timestamp);
        Ok(entry)
    }

    /// Every recorded entry, oldest first
    pub fn trend(&self) -> Trend {
        Trend {
            entries: self.read_entries().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, Vec<SessionLogEntry>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
