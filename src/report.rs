//! Run reporting: per-directory summaries, run totals, the persisted
//! run-result artifact, and the cumulative download log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Local;
use console::style;
use tracing::info;

use crate::models::{
    DirectorySummary, DownloadOutcome, FailureDetail, OutcomeStatus, RunSummary,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Human-readable duration: "45s", "3m 20s", "1h 5m".
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Accumulates outcomes while one directory is being processed.
pub struct DirectoryReport {
    directory: String,
    started: Instant,
    success: usize,
    failed: usize,
    skipped: usize,
    failures: Vec<FailureDetail>,
}

impl DirectoryReport {
    pub fn new(directory: &str) -> Self {
        Self {
            directory: directory.to_string(),
            started: Instant::now(),
            success: 0,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: &DownloadOutcome) {
        match outcome.status {
            OutcomeStatus::Success => self.success += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Failed => {
                self.failed += 1;
                self.failures.push(FailureDetail {
                    name: outcome.name.clone(),
                    reason: outcome
                        .reason
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                });
            }
        }
    }

    /// Finalize elapsed time and emit the summary log.
    pub fn finalize(self, status: &str) -> DirectorySummary {
        let elapsed = self.started.elapsed().as_secs();
        info!(
            "Directory [{}] done: {} ok, {} skipped, {} failed in {}",
            self.directory,
            self.success,
            self.skipped,
            self.failed,
            format_duration(elapsed)
        );
        for failure in &self.failures {
            info!("  failed: {}: {}", failure.name, failure.reason);
        }
        DirectorySummary {
            directory: self.directory,
            success: self.success,
            failed: self.failed,
            skipped: self.skipped,
            elapsed_seconds: elapsed,
            status: status.to_string(),
            failures: self.failures,
        }
    }

    /// A directory that produced no activity at all (e.g. manifest failure).
    pub fn empty(directory: &str, status: &str) -> DirectorySummary {
        DirectorySummary {
            directory: directory.to_string(),
            success: 0,
            failed: 0,
            skipped: 0,
            elapsed_seconds: 0,
            status: status.to_string(),
            failures: Vec::new(),
        }
    }
}

/// Accumulates directory summaries across the whole run.
pub struct RunReport {
    started_at: chrono::DateTime<Local>,
    started: Instant,
    directories: Vec<DirectorySummary>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            started: Instant::now(),
            directories: Vec::new(),
        }
    }

    pub fn push(&mut self, summary: DirectorySummary) {
        self.directories.push(summary);
    }

    pub fn totals(&self) -> (usize, usize, usize) {
        self.directories.iter().fold((0, 0, 0), |(s, f, k), d| {
            (s + d.success, f + d.failed, k + d.skipped)
        })
    }

    pub fn finish(self) -> RunSummary {
        let (success, failed, skipped) = self.totals();
        RunSummary {
            start_time: self.started_at.format(TIMESTAMP_FORMAT).to_string(),
            end_time: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            total_time_seconds: self.started.elapsed().as_secs(),
            total_success: success,
            total_failed: failed,
            total_skipped: skipped,
            total_directories: self.directories.len(),
            directory_results: self.directories,
        }
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only log of every successful download, cumulative across runs:
/// `[timestamp] relativePath | filename`.
pub struct DownloadLog {
    path: PathBuf,
}

impl DownloadLog {
    pub fn new(root: &Path, file_name: &str) -> Self {
        Self {
            path: root.join(file_name),
        }
    }

    pub fn append(&self, relative_path: &str, filename: &str) -> std::io::Result<()> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "[{timestamp}] {relative_path} | {filename}")
    }
}

/// Persist the run summary as a timestamped JSON artifact in the root.
pub fn write_artifact(root: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let name = format!(
        "download_result_{}.json",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let path = root.join(name);
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json)
        .with_context(|| format!("failed to write run artifact {}", path.display()))?;
    info!("Run results saved to {}", path.display());
    Ok(path)
}

/// Print the end-of-run totals and per-directory table.
pub fn print_final_table(summary: &RunSummary) {
    println!();
    println!("{}", style("Run complete").bold());
    println!(
        "  {} success, {} skipped, {} failed across {} directories in {}",
        style(summary.total_success).green(),
        style(summary.total_skipped).yellow(),
        style(summary.total_failed).red(),
        summary.total_directories,
        format_duration(summary.total_time_seconds)
    );
    if let Some(rate) = summary.success_rate() {
        println!("  success rate: {rate:.1}%");
    }

    println!();
    println!(
        "{:<40} {:>8} {:>8} {:>8}  {}",
        "directory", "ok", "skip", "fail", "status"
    );
    for dir in &summary.directory_results {
        println!(
            "{:<40} {:>8} {:>8} {:>8}  {}",
            display_name(&dir.directory),
            dir.success,
            dir.skipped,
            dir.failed,
            dir.status
        );
    }
}

/// Table cell for a directory name, keeping the tail of long names.
/// Truncates on character boundaries; directory names are routinely CJK.
fn display_name(directory: &str) -> String {
    let width = directory.chars().count();
    if width <= 38 {
        return directory.to_string();
    }
    let tail: String = directory.chars().skip(width - 35).collect();
    format!("...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(200), "3m 20s");
        assert_eq!(format_duration(3900), "1h 5m");
    }

    #[test]
    fn directory_report_counts_outcomes() {
        let mut report = DirectoryReport::new("sub/dir");
        report.record(&DownloadOutcome::success("a", PathBuf::from("a.xlsx")));
        report.record(&DownloadOutcome::skipped("b", PathBuf::from("b.xlsx")));
        report.record(&DownloadOutcome::failed("c", "MissingURL"));
        report.record(&DownloadOutcome::failed("d", "DownloadTimeout"));

        let summary = report.finalize("done");
        assert_eq!(summary.success, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.failures[0].reason, "MissingURL");
    }

    #[test]
    fn run_report_folds_directories() {
        let mut run = RunReport::new();
        let mut a = DirectoryReport::new("a");
        a.record(&DownloadOutcome::success("x", PathBuf::from("x")));
        run.push(a.finalize("done"));
        run.push(DirectoryReport::empty("b", "parse-error"));

        let summary = run.finish();
        assert_eq!(summary.total_directories, 2);
        assert_eq!(summary.total_success, 1);
        assert_eq!(summary.total_failed, 0);
        assert_eq!(summary.directory_results[1].status, "parse-error");
        assert_eq!(summary.success_rate(), Some(100.0));
    }

    #[test]
    fn download_log_appends_one_line_per_success() {
        let dir = tempfile::tempdir().unwrap();
        let log = DownloadLog::new(dir.path(), "downloaded_files.txt");
        log.append("reports/q1.xlsx", "q1.xlsx").unwrap();
        log.append("reports/q2.xlsx", "q2.xlsx").unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("downloaded_files.txt")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("reports/q1.xlsx | q1.xlsx"));
        assert!(lines[1].contains("] reports/q2.xlsx | q2.xlsx"));
    }

    #[test]
    fn long_directory_names_truncate_on_char_boundaries() {
        let ascii = "a".repeat(50);
        assert_eq!(display_name(&ascii), format!("...{}", "a".repeat(35)));

        // 40 three-byte characters: byte-offset slicing would panic here
        let cjk = "文".repeat(40);
        assert_eq!(display_name(&cjk), format!("...{}", "文".repeat(35)));

        // under the limit in characters even though well over it in bytes
        let short = "部门文档/二〇二四年度财务报表与预算计划";
        assert_eq!(display_name(short), short);
    }

    #[test]
    fn final_table_tolerates_multibyte_directory_names() {
        let mut run = RunReport::new();
        run.push(DirectoryReport::empty(
            &"二〇二四年度财务报表与预算计划".repeat(4),
            "done",
        ));
        print_final_table(&run.finish());
    }

    #[test]
    fn artifact_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let summary = RunReport::new().finish();
        let path = write_artifact(dir.path(), &summary).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["total_directories"], 0);
        assert!(value["start_time"].is_string());
    }
}
