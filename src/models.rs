//! Core data model for a download run.

use std::path::PathBuf;

use serde::Serialize;

use crate::naming::sanitize_filename;

/// A directory selected for processing because it contains a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryWorkItem {
    pub path: PathBuf,
    /// Component depth relative to the scan root (root itself is 0).
    pub depth: usize,
}

/// Document category, derived solely from the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Sheet,
    Doc,
    Other,
}

impl DocKind {
    /// Classify a document URL. "sheet" wins over "doc" when both appear.
    pub fn from_url(url: &str) -> Self {
        let url = url.to_lowercase();
        if url.contains("sheet") {
            DocKind::Sheet
        } else if url.contains("doc") {
            DocKind::Doc
        } else {
            DocKind::Other
        }
    }

    /// Expected file extension for exports of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            DocKind::Sheet => "xlsx",
            DocKind::Doc => "docx",
            DocKind::Other => "bin",
        }
    }
}

/// One manifest entry, ready for processing.
#[derive(Debug, Clone)]
pub struct DocumentTask {
    /// 1-based position within the manifest.
    pub index: usize,
    /// Display name as given by the manifest (or a positional placeholder).
    pub name: String,
    /// Filesystem-safe variant of `name`, never empty.
    pub sanitized_name: String,
    pub url: Option<String>,
    pub kind: DocKind,
}

impl DocumentTask {
    pub fn new(index: usize, name: Option<String>, url: Option<String>) -> Self {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("doc_{index}"));
        // A blank URL is as unusable as an absent one.
        let url = url.filter(|u| !u.trim().is_empty());
        let kind = url.as_deref().map(DocKind::from_url).unwrap_or(DocKind::Other);
        Self {
            index,
            sanitized_name: sanitize_filename(&name),
            name,
            url,
            kind,
        }
    }
}

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Skipped,
    Failed,
}

/// Result of processing one task. Exactly one of these exists per task.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub name: String,
    pub result_path: Option<PathBuf>,
    pub status: OutcomeStatus,
    /// Present iff the task failed.
    pub reason: Option<String>,
}

impl DownloadOutcome {
    pub fn success(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            result_path: Some(path),
            status: OutcomeStatus::Success,
            reason: None,
        }
    }

    pub fn skipped(name: &str, existing: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            result_path: Some(existing),
            status: OutcomeStatus::Skipped,
            reason: None,
        }
    }

    pub fn failed(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            result_path: None,
            status: OutcomeStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// A single failure, for the directory summary.
#[derive(Debug, Clone, Serialize)]
pub struct FailureDetail {
    pub name: String,
    pub reason: String,
}

/// Finalized per-directory counts.
#[derive(Debug, Clone, Serialize)]
pub struct DirectorySummary {
    /// Path relative to the scan root.
    pub directory: String,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_seconds: u64,
    pub status: String,
    pub failures: Vec<FailureDetail>,
}

/// Totals for the whole run, persisted as the run-result artifact.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub start_time: String,
    pub end_time: String,
    pub total_time_seconds: u64,
    pub total_success: usize,
    pub total_failed: usize,
    pub total_skipped: usize,
    pub total_directories: usize,
    pub directory_results: Vec<DirectorySummary>,
}

impl RunSummary {
    /// Success rate over attempted tasks, `None` when nothing was attempted.
    pub fn success_rate(&self) -> Option<f64> {
        let attempts = self.total_success + self.total_failed;
        if attempts == 0 {
            None
        } else {
            Some(self.total_success as f64 / attempts as f64 * 100.0)
        }
    }
}
