//! Local persistence — board JSON files on disk.
//!
//! Used when the remote store is unavailable, as the backup target when a
//! remote write fails, and for user-facing export/import. Every file is a
//! `BoardDocument`: `{shapes, strokes, selectedId, timestamp}`.
//!
//! ERROR HANDLING
//! ==============
//! Writes go to a temporary sibling and are renamed into place, so a crash
//! mid-write leaves the previous copy intact. Import parses and validates
//! the whole document before anything is returned; callers never see a
//! partially decoded board.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::now_ms;
use crate::doc::{BoardState, EntityId, Shape, Stroke, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum LocalStoreError {
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
    #[error("invalid file format: {0}")]
    InvalidFormat(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk form of a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardDocument {
    pub shapes: Vec<Shape>,
    pub strokes: Vec<Stroke>,
    #[serde(default)]
    pub selected_id: Option<EntityId>,
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl BoardDocument {
    #[must_use]
    pub fn from_state(state: &BoardState) -> Self {
        Self {
            shapes: state.shapes.clone(),
            strokes: state.strokes.clone(),
            selected_id: state.selected_id.clone(),
            timestamp: now_ms(),
        }
    }

    #[must_use]
    pub fn into_state(self) -> BoardState {
        let mut state = BoardState { shapes: self.shapes, strokes: self.strokes, selected_id: self.selected_id };
        state.apply_selection();
        state
    }
}

// =============================================================================
// LOCAL STORE
// =============================================================================

/// Key → board file store rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, LocalStoreError> {
        let valid = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(LocalStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    /// Persist `state` under `key`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for keys outside `[A-Za-z0-9_-]`, or `Io` if the
    /// file cannot be written.
    pub async fn save(&self, key: &str, state: &BoardState) -> Result<(), LocalStoreError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        write_document(&path, &BoardDocument::from_state(state)).await?;
        info!(key, shapes = state.shapes.len(), strokes = state.strokes.len(), "local store: saved board");
        Ok(())
    }

    /// Load the board stored under `key`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the stored file is not a board document.
    pub async fn load(&self, key: &str) -> Result<Option<BoardState>, LocalStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(parse_document(&bytes)?.into_state())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the board stored under `key`. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file exists but cannot be removed.
    pub async fn remove(&self, key: &str) -> Result<(), LocalStoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Write `state` to a user-chosen file.
///
/// # Errors
///
/// Returns `Io` if the file cannot be written.
pub async fn export_board(state: &BoardState, path: &Path) -> Result<(), LocalStoreError> {
    write_document(path, &BoardDocument::from_state(state)).await
}

/// Read a board file previously produced by `export_board`.
///
/// # Errors
///
/// Returns `InvalidFormat` if the file is not a board document, or `Io` if it
/// cannot be read.
pub async fn import_board(path: &Path) -> Result<BoardState, LocalStoreError> {
    let bytes = tokio::fs::read(path).await?;
    match parse_document(&bytes) {
        Ok(doc) => Ok(doc.into_state()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "import: invalid file format");
            Err(e.into())
        }
    }
}

fn parse_document(bytes: &[u8]) -> Result<BoardDocument, serde_json::Error> {
    serde_json::from_slice(bytes)
}

async fn write_document(path: &Path, doc: &BoardDocument) -> Result<(), LocalStoreError> {
    let json = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;
