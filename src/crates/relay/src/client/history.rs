//! Local conversation history
//!
//! Keeps the last `keep_last` completed exchanges, optionally persisted as a
//! JSON array. A missing or unreadable file starts an empty history.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::fingerprint::Category;
use crate::Result;

/// One completed exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    pub query: String,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(category: Category, query: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            query: query.into(),
            content: content.into(),
        }
    }
}

/// Bounded, optionally persistent history
pub struct ConversationHistory {
    path: Option<PathBuf>,
    keep_last: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl ConversationHistory {
    /// History kept only in memory
    pub fn in_memory(keep_last: usize) -> Self {
        Self {
            path: None,
            keep_last: keep_last.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Load from `path`, starting empty if the file is missing or corrupt.
    pub fn load(path: impl Into<PathBuf>, keep_last: usize) -> Self {
        let path = path.into();
        let keep_last = keep_last.max(1);

        let mut entries: VecDeque<HistoryEntry> = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<HistoryEntry>>(&bytes) {
                Ok(entries) => entries.into(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable history file");
                    VecDeque::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read history file");
                VecDeque::new()
            }
        };
        while entries.len() > keep_last {
            entries.pop_front();
        }

        Self {
            path: Some(path),
            keep_last,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an entry, dropping the oldest beyond `keep_last`, and persist.
    pub fn append(&self, entry: HistoryEntry) -> Result<()> {
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            while entries.len() > self.keep_last {
                entries.pop_front();
            }
            entries.iter().cloned().collect::<Vec<_>>()
        };

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_vec_pretty(&snapshot)?)?;
        }
        Ok(())
    }

    /// Entries, oldest first
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
