//! Work discovery: find directories that carry a manifest.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::models::DirectoryWorkItem;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("root directory does not exist: {0}")]
    RootMissing(PathBuf),
    #[error("no directory under the root contains a manifest")]
    NoWorkFound,
}

/// Recursively enumerate directories (root included) containing a manifest
/// file, ordered by ascending depth with a lexical path tie-break.
///
/// Parent directories therefore always sort before their descendants.
/// Manifest contents are not inspected here. Unreadable subdirectories are
/// skipped with a warning.
pub fn discover(root: &Path, manifest_name: &str) -> Result<Vec<DirectoryWorkItem>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootMissing(root.to_path_buf()));
    }

    let mut items = Vec::new();
    collect(root, manifest_name, 0, &mut items);

    if items.is_empty() {
        return Err(DiscoveryError::NoWorkFound);
    }

    items.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.path.cmp(&b.path)));
    Ok(items)
}

fn collect(dir: &Path, manifest_name: &str, depth: usize, items: &mut Vec<DirectoryWorkItem>) {
    if dir.join(manifest_name).is_file() {
        items.push(DirectoryWorkItem {
            path: dir.to_path_buf(),
            depth,
        });
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Skipping unreadable directory {}: {}", dir.display(), e);
            return;
        }
    };

    let mut subdirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();

    for sub in subdirs {
        collect(&sub, manifest_name, depth + 1, items);
    }
}
