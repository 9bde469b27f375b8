//! Download completion detection.
//!
//! Browsers give no explicit "done" signal for a triggered download, so
//! completion is inferred from the filesystem: new files relative to a
//! snapshot taken before the trigger click, filtered for in-progress
//! markers, then confirmed by a size-stability vote.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("download did not complete within {0:?}")]
    Timeout(Duration),
}

/// Timing knobs for the detector. Tests run with millisecond values.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub stability_interval: Duration,
    /// Consecutive equal, non-zero size readings required.
    pub stable_checks_needed: u32,
    /// Cap on readings per stability vote.
    pub max_stability_checks: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            stability_interval: Duration::from_secs(1),
            stable_checks_needed: 3,
            max_stability_checks: 10,
        }
    }
}

/// Names the browser uses for not-yet-finished or hidden files.
fn is_partial(name: &str) -> bool {
    name.ends_with(".crdownload")
        || name.ends_with(".tmp")
        || name.starts_with('.')
        || name.starts_with('~')
}

/// Snapshot of plain-file names in a directory.
pub fn snapshot_files(dir: &Path) -> std::io::Result<HashSet<OsString>> {
    let mut names = HashSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.path().is_file() {
            names.insert(entry.file_name());
        }
    }
    Ok(names)
}

fn new_complete_files(dir: &Path, before: &HashSet<OsString>) -> std::io::Result<Vec<PathBuf>> {
    let mut fresh: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| !before.contains(&e.file_name()))
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| !is_partial(n))
                .unwrap_or(true)
        })
        .map(|e| e.path())
        .collect();
    fresh.sort();
    Ok(fresh)
}

/// Number of complete new files relative to `before`. Informational check
/// right after the trigger click; scan errors count as zero.
pub fn new_file_count(dir: &Path, before: &HashSet<OsString>) -> usize {
    new_complete_files(dir, before).map(|f| f.len()).unwrap_or(0)
}

/// Wait for the file produced by a just-triggered download.
///
/// Candidates are new files in `dir` relative to `before`, excluding
/// in-progress markers. When several appear together the lexicographically
/// smallest is taken; that tie-break is a default policy, not a download
/// semantic. On outer timeout a last-chance scan returns the most recently
/// modified new file, if any.
pub async fn wait_for_download(
    dir: &Path,
    before: &HashSet<OsString>,
    cfg: &DetectorConfig,
) -> Result<PathBuf, DetectError> {
    let deadline = Instant::now() + cfg.timeout;
    info!(
        "Waiting for download in {} (timeout {:?}, {} files before)",
        dir.display(),
        cfg.timeout,
        before.len()
    );

    while Instant::now() < deadline {
        let candidates = match new_complete_files(dir, before) {
            Ok(c) => c,
            Err(e) => {
                // Transient scan failure: retry on the next tick.
                warn!("Directory scan failed, retrying: {}", e);
                tokio::time::sleep(cfg.poll_interval).await;
                continue;
            }
        };

        if let Some(candidate) = candidates.into_iter().next() {
            debug!("New file detected: {}", candidate.display());
            if let Some(done) = stability_vote(&candidate, cfg).await {
                return Ok(done);
            }
            // Candidate vanished or never settled; keep polling, another
            // file may yet appear.
        }

        tokio::time::sleep(cfg.poll_interval).await;
    }

    warn!("Download wait timed out, running last-chance scan");
    last_chance(dir, before).ok_or(DetectError::Timeout(cfg.timeout))
}

/// Require several consecutive equal, non-zero size readings before
/// declaring the file fully written. Any change resets the counter.
async fn stability_vote(candidate: &Path, cfg: &DetectorConfig) -> Option<PathBuf> {
    let mut stable = 0u32;
    let mut last_size: Option<u64> = None;

    for _ in 0..cfg.max_stability_checks {
        let size = match std::fs::metadata(candidate) {
            Ok(meta) => meta.len(),
            Err(_) => {
                warn!("Candidate disappeared mid-vote: {}", candidate.display());
                return None;
            }
        };

        if last_size == Some(size) && size > 0 {
            stable += 1;
            debug!(
                "Stability check {}/{} ({} bytes)",
                stable, cfg.stable_checks_needed, size
            );
            if stable >= cfg.stable_checks_needed {
                info!(
                    "Download complete: {} ({} bytes)",
                    candidate.display(),
                    size
                );
                return Some(candidate.to_path_buf());
            }
        } else {
            if let Some(prev) = last_size {
                debug!("Size changed: {} -> {} bytes", prev, size);
            }
            stable = 0;
            last_size = Some(size);
        }

        tokio::time::sleep(cfg.stability_interval).await;
    }

    None
}

/// Best-effort result after timeout: most recently modified new file.
fn last_chance(dir: &Path, before: &HashSet<OsString>) -> Option<PathBuf> {
    let fresh = new_complete_files(dir, before).ok()?;
    fresh
        .into_iter()
        .max_by_key(|p| p.metadata().and_then(|m| m.modified()).ok())
}
