//! Playback history & resume offsets.
//!
//! A single JSON document at `<data-dir>/vPlayer/history.json`. Writes are
//! atomic (write-then-rename) so a crash mid-save never corrupts the
//! document. The playback core only consumes the resume-offset surface; the
//! rest of the document belongs to the shell around it and is preserved
//! verbatim across saves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("replace history file: {0}")]
    Replace(String),
}

/// The on-disk document. Field names are part of the format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryDocument {
    pub entries: Vec<HistoryEntry>,
    pub last_played_path: Option<String>,
    pub last_playback_seconds: Option<f64>,
    pub playback_offsets: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Opaque platform bookmark token, stored verbatim.
    pub bookmark: String,
    pub title: String,
    pub path: String,
}

/// File-backed store. Stateless between calls; every operation re-reads the
/// document so external writers (the library shell) are never clobbered
/// beyond the fields an operation owns.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn open_default() -> Self {
        Self::new(Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vPlayer")
            .join("history.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; a missing or corrupt file reads as empty.
    pub fn load(&self) -> HistoryDocument {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "cannot read history");
                }
                return HistoryDocument::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "malformed history, starting empty");
                HistoryDocument::default()
            }
        }
    }

    /// Stored offset for a source, falling back to the last-played pair when
    /// it refers to the same file.
    pub fn resume_for(&self, source: &Path) -> Option<f64> {
        let doc = self.load();
        let key = source.to_string_lossy();
        doc.playback_offsets.get(key.as_ref()).copied().or_else(|| {
            (doc.last_played_path.as_deref() == Some(key.as_ref()))
                .then_some(doc.last_playback_seconds)
                .flatten()
        })
    }

    /// Record the current playback position for a source.
    pub fn record_position(&self, source: &Path, seconds: f64) -> Result<(), HistoryError> {
        let mut doc = self.load();
        let key = source.to_string_lossy().into_owned();
        doc.playback_offsets.insert(key.clone(), seconds);
        doc.last_played_path = Some(key);
        doc.last_playback_seconds = Some(seconds);
        self.save(&doc)
    }

    pub fn save(&self, doc: &HistoryDocument) -> Result<(), HistoryError> {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)?;

        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        serde_json::to_writer_pretty(&tmp, doc)?;
        tmp.persist(&self.path)
            .map_err(|e| HistoryError::Replace(e.to_string()))?;
        debug!(path = %self.path.display(), "history saved");
        Ok(())
    }
}
