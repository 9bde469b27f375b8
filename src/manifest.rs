//! Manifest parsing.
//!
//! Each work directory carries a JSON manifest listing the documents to
//! export: `{"body": {"file_list": [{"name": ..., "doc_url": ...}, ...]}}`.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::models::DocumentTask;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("manifest has no file list")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    body: ManifestBody,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestBody {
    #[serde(default)]
    file_list: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    name: Option<String>,
    doc_url: Option<String>,
}

/// Load and parse the manifest in `dir` into an ordered task list.
///
/// A task missing its URL is still returned (`url: None`); the caller
/// classifies it as failed without touching the browser. A missing name is
/// defaulted to a positional placeholder.
pub fn read_manifest(dir: &Path, manifest_name: &str) -> Result<Vec<DocumentTask>, ManifestError> {
    let path = dir.join(manifest_name);
    let content = fs::read_to_string(&path)?;
    let manifest: ManifestFile = serde_json::from_str(&content)?;

    if manifest.body.file_list.is_empty() {
        return Err(ManifestError::Empty);
    }

    Ok(manifest
        .body
        .file_list
        .into_iter()
        .enumerate()
        .map(|(i, entry)| DocumentTask::new(i + 1, entry.name, entry.doc_url))
        .collect())
}
