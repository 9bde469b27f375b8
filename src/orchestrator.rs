//! Download orchestration.
//!
//! Strictly sequential end-to-end: one browser session, one directory at a
//! time, one document at a time. The sequencing is a correctness measure,
//! not an efficiency oversight: the completion detector identifies a
//! finished download purely by filesystem delta against a snapshot taken
//! right before the trigger click, which would be ambiguous with two
//! downloads in flight into the same directory.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::detect;
use crate::discovery::{self, DiscoveryError};
use crate::driver::ExportDriver;
use crate::export::{ExportError, ExportMachine};
use crate::manifest::{self, ManifestError};
use crate::models::{DocumentTask, DownloadOutcome, RunSummary};
use crate::naming;
use crate::report::{DirectoryReport, DownloadLog, RunReport};

/// Process every manifest-bearing directory under the configured root.
///
/// Task-level and directory-level failures are absorbed into the report;
/// only environment failures (missing root) escape as errors.
pub async fn run(driver: &dyn ExportDriver, config: &Config) -> Result<RunSummary> {
    let mut report = RunReport::new();

    let items = match discovery::discover(&config.root, &config.manifest_name) {
        Ok(items) => items,
        Err(DiscoveryError::NoWorkFound) => {
            warn!(
                "No directory under {} contains {}, nothing to do",
                config.root.display(),
                config.manifest_name
            );
            return Ok(report.finish());
        }
        Err(e @ DiscoveryError::RootMissing(_)) => {
            return Err(e).context("work discovery failed");
        }
    };

    info!("Found {} directories to process:", items.len());
    for (i, item) in items.iter().enumerate() {
        info!("  {}. {}", i + 1, relative_name(&item.path, &config.root));
    }

    let log = DownloadLog::new(&config.root, &config.download_log_name);

    for (dir_idx, item) in items.iter().enumerate() {
        let rel = relative_name(&item.path, &config.root);
        info!(
            "[{}/{}] Processing directory: {}",
            dir_idx + 1,
            items.len(),
            rel
        );

        let summary = process_directory(driver, config, &item.path, &rel, &log).await;
        report.push(summary);

        let (success, failed, skipped) = report.totals();
        info!(
            "Progress: {}/{} directories, totals: {} ok / {} skipped / {} failed",
            dir_idx + 1,
            items.len(),
            success,
            skipped,
            failed
        );

        if dir_idx + 1 < items.len() {
            tokio::time::sleep(config.directory_pause()).await;
        }
    }

    Ok(report.finish())
}

/// One directory pass. Manifest failures become a zero-activity summary
/// instead of unwinding.
async fn process_directory(
    driver: &dyn ExportDriver,
    config: &Config,
    dir: &Path,
    rel: &str,
    log: &DownloadLog,
) -> crate::models::DirectorySummary {
    // Downloads for this directory should land in this directory.
    if let Err(e) = driver.set_download_dir(dir).await {
        warn!("Failed to update download directory for {}: {}", rel, e);
    }

    let tasks = match manifest::read_manifest(dir, &config.manifest_name) {
        Ok(tasks) => tasks,
        Err(e) => {
            error!("Cannot process {}: {}", rel, e);
            let status = match e {
                ManifestError::Io(_) => "manifest-read-error",
                ManifestError::Parse(_) => "parse-error",
                ManifestError::Empty => "empty-manifest",
            };
            return DirectoryReport::empty(rel, status);
        }
    };

    info!("{} documents queued in {}", tasks.len(), rel);
    let mut report = DirectoryReport::new(rel);
    let bar = ProgressBar::new(tasks.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{prefix} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_prefix(rel.to_string());

    let total = tasks.len();
    for task in &tasks {
        info!("[{}/{}] Processing: {}", task.index, total, task.name);
        let outcome = process_task(driver, config, dir, log, task).await;
        report.record(&outcome);
        bar.inc(1);

        if task.index < total {
            tokio::time::sleep(config.task_pause()).await;
        }
    }
    bar.finish_and_clear();

    report.finalize("done")
}

/// One document. Every failure mode is converted into a Failed outcome;
/// nothing unwinds past here.
async fn process_task(
    driver: &dyn ExportDriver,
    config: &Config,
    dir: &Path,
    log: &DownloadLog,
    task: &DocumentTask,
) -> DownloadOutcome {
    let Some(url) = task.url.as_deref() else {
        warn!("[{}] {}: no URL in manifest", task.index, task.name);
        return DownloadOutcome::failed(&task.name, "MissingURL");
    };

    // Fast path: a prior run (or a manual copy) already produced this output.
    let ext = task.kind.extension();
    if let Some(existing) = naming::existing_output(dir, &task.sanitized_name, ext) {
        info!(
            "[{}] {}: output already exists ({}), skipping",
            task.index,
            task.name,
            existing.display()
        );
        return DownloadOutcome::skipped(&task.name, existing);
    }

    debug!("[{}] Opening {}", task.index, url);
    match tokio::time::timeout(config.page_load_timeout(), driver.navigate(url)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("[{}] {}: navigation failed: {}", task.index, task.name, e);
            save_diagnostics(driver, dir, &diag_tag(task, "open_err")).await;
            return DownloadOutcome::failed(&task.name, "NavigationFailure");
        }
        Err(_) => {
            warn!("[{}] {}: page load timed out", task.index, task.name);
            save_diagnostics(driver, dir, &diag_tag(task, "open_err")).await;
            return DownloadOutcome::failed(&task.name, "NavigationFailure");
        }
    }
    tokio::time::sleep(config.settle_wait()).await;

    // Snapshot before the trigger click; the detector works off this delta.
    // Without it every pre-existing file would look like the download, so a
    // failed snapshot fails the task rather than risking a bogus rename.
    let before = match detect::snapshot_files(dir) {
        Ok(before) => before,
        Err(e) => {
            warn!("[{}] {}: cannot snapshot {}: {}", task.index, task.name, dir.display(), e);
            return DownloadOutcome::failed(&task.name, "DirectoryScanError");
        }
    };

    let waits = config.export_waits();
    let mut machine = ExportMachine::new(driver, &waits);
    if let Err(e) = machine.run(task.kind).await {
        let reason = match &e {
            ExportError::ElementNotFound { .. } => "ElementNotFound".to_string(),
            ExportError::Driver(inner) => format!("DriverError: {inner}"),
        };
        warn!("[{}] {}: export failed: {}", task.index, task.name, e);
        save_diagnostics(driver, dir, &diag_tag(task, "export_err")).await;
        return DownloadOutcome::failed(&task.name, reason);
    }

    let appeared = detect::new_file_count(dir, &before);
    if appeared > 0 {
        info!(
            "[{}] {} new file(s) already present after the export click",
            task.index, appeared
        );
    }

    let downloaded = match detect::wait_for_download(dir, &before, &config.detector()).await {
        Ok(path) => path,
        Err(e) => {
            warn!("[{}] {}: {}", task.index, task.name, e);
            save_diagnostics(driver, dir, &diag_tag(task, "timeout")).await;
            return DownloadOutcome::failed(&task.name, "DownloadTimeout");
        }
    };

    let dest = match naming::finalize(&downloaded, dir, &task.sanitized_name, task.kind) {
        Ok(dest) => dest,
        Err(e) => {
            warn!("[{}] {}: {}", task.index, task.name, e);
            return DownloadOutcome::failed(&task.name, "RenameFailure");
        }
    };

    let filename = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let rel_path = relative_name(&dest, &config.root);
    if let Err(e) = log.append(&rel_path, &filename) {
        warn!("Failed to append to download log: {}", e);
    }

    info!("[{}] Downloaded: {}", task.index, filename);
    DownloadOutcome::success(&task.name, dest)
}

fn relative_name(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().to_string(),
        Err(_) => path.to_string_lossy().to_string(),
    }
}

fn diag_tag(task: &DocumentTask, suffix: &str) -> String {
    format!("{}_{}_{}", task.index, task.sanitized_name, suffix)
}

/// Persist page markup and a screenshot for post-mortem inspection.
async fn save_diagnostics(driver: &dyn ExportDriver, dir: &Path, tag: &str) {
    let debug_dir = dir.join("debug");
    if let Err(e) = std::fs::create_dir_all(&debug_dir) {
        warn!("Cannot create debug directory: {}", e);
        return;
    }
    let ts = Local::now().format("%Y%m%d_%H%M%S");

    match driver.page_source().await {
        Ok(html) => {
            let path = debug_dir.join(format!("{tag}_{ts}.html"));
            if let Err(e) = std::fs::write(&path, html) {
                warn!("Failed to save page markup: {}", e);
            } else {
                info!("Saved diagnostic markup: {}", path.display());
            }
        }
        Err(e) => warn!("Could not capture page markup: {}", e),
    }

    match driver.screenshot().await {
        Ok(png) => {
            let path = debug_dir.join(format!("{tag}_{ts}.png"));
            if let Err(e) = std::fs::write(&path, png) {
                warn!("Failed to save screenshot: {}", e);
            } else {
                info!("Saved diagnostic screenshot: {}", path.display());
            }
        }
        Err(e) => warn!("Could not capture screenshot: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::driver::{CookieSpec, DriverError, Selector};
    use crate::export::STEP_EXPORT_TYPE;

    /// Driver that simulates the export UI: the export-type click drops a
    /// file into the configured download directory.
    struct ScriptedDriver {
        download_dir: Mutex<Option<PathBuf>>,
        navigations: Mutex<Vec<String>>,
        /// Steps whose selectors never resolve.
        broken_steps: HashSet<&'static str>,
        /// Name and size of the file the "browser" writes.
        drops: (&'static str, usize),
    }

    impl ScriptedDriver {
        fn new() -> Self {
            Self {
                download_dir: Mutex::new(None),
                navigations: Mutex::new(Vec::new()),
                broken_steps: HashSet::new(),
                drops: ("export_tmp.xlsx", 1_048_576),
            }
        }

        fn with_broken_step(step: &'static str) -> Self {
            let mut driver = Self::new();
            driver.broken_steps.insert(step);
            driver
        }

        fn navigations(&self) -> Vec<String> {
            self.navigations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExportDriver for ScriptedDriver {
        async fn navigate(&self, url: &str) -> Result<(), DriverError> {
            self.navigations.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn set_download_dir(&self, dir: &Path) -> Result<(), DriverError> {
            *self.download_dir.lock().unwrap() = Some(dir.to_path_buf());
            Ok(())
        }

        async fn find_clickable(
            &self,
            step: &str,
            _candidates: &[Selector],
            _each_wait: Duration,
        ) -> Result<usize, DriverError> {
            if self.broken_steps.contains(step) {
                return Err(DriverError::ElementNotFound(step.to_string()));
            }
            if step == STEP_EXPORT_TYPE {
                let dir = self.download_dir.lock().unwrap().clone().unwrap();
                std::fs::write(dir.join(self.drops.0), vec![0u8; self.drops.1]).unwrap();
            }
            Ok(0)
        }

        async fn click_confirmation(&self, _labels: &[&str]) -> Result<bool, DriverError> {
            Ok(false)
        }

        async fn inject_cookies(&self, _cookies: &[CookieSpec]) -> Result<usize, DriverError> {
            Ok(0)
        }

        async fn page_source(&self) -> Result<String, DriverError> {
            Ok("<html>diag</html>".to_string())
        }

        async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
            Ok(vec![1, 2, 3])
        }

        async fn close(&mut self) {}
    }

    fn fast_config(root: &Path) -> Config {
        Config {
            root: root.to_path_buf(),
            page_load_timeout_secs: 5,
            element_wait_secs: 0,
            fallback_wait_secs: 0,
            download_timeout_secs: 2,
            menu_wait_secs: 0,
            click_wait_secs: 0,
            confirm_wait_secs: 0,
            settle_wait_secs: 0,
            poll_interval_secs: 0,
            stable_checks: 1,
            task_pause_secs: 0,
            directory_pause_secs: 0,
            ..Config::default()
        }
    }

    fn write_manifest(dir: &Path, entries: &str) {
        std::fs::write(
            dir.join("data.json"),
            format!(r#"{{"body": {{"file_list": [{entries}]}}}}"#),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn valid_and_urlless_tasks_split_into_success_and_failure() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            r#"{"name": "A", "doc_url": "https://x/sheet/a"},
               {"name": "B"}"#,
        );

        let driver = ScriptedDriver::new();
        let summary = run(&driver, &fast_config(tmp.path())).await.unwrap();

        assert_eq!(summary.total_success, 1);
        assert_eq!(summary.total_failed, 1);
        assert_eq!(summary.total_skipped, 0);
        let dir = &summary.directory_results[0];
        assert_eq!(dir.failures.len(), 1);
        assert_eq!(dir.failures[0].name, "B");
        assert_eq!(dir.failures[0].reason, "MissingURL");

        // A's download was renamed onto the logical name.
        assert!(tmp.path().join("A.xlsx").exists());
        assert!(!tmp.path().join("export_tmp.xlsx").exists());

        // B never touched the browser.
        assert_eq!(driver.navigations(), vec!["https://x/sheet/a"]);

        // The success made it into the cumulative log.
        let log = std::fs::read_to_string(tmp.path().join("downloaded_files.txt")).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("A.xlsx | A.xlsx"));
    }

    #[tokio::test]
    async fn snapshot_failure_fails_the_task_instead_of_claiming_old_files() {
        let tmp = tempfile::tempdir().unwrap();
        // the task's directory disappears before the snapshot
        let gone = tmp.path().join("vanished");
        let driver = ScriptedDriver::new();
        let config = fast_config(tmp.path());
        let log = DownloadLog::new(tmp.path(), "downloaded_files.txt");
        let task = DocumentTask::new(1, Some("A".into()), Some("https://x/sheet/a".into()));

        let outcome = process_task(&driver, &config, &gone, &log, &task).await;
        assert_eq!(outcome.status, crate::models::OutcomeStatus::Failed);
        assert_eq!(outcome.reason.as_deref(), Some("DirectoryScanError"));
    }

    #[tokio::test]
    async fn blank_url_fails_without_navigation() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), r#"{"name": "A", "doc_url": ""}"#);

        let driver = ScriptedDriver::new();
        let summary = run(&driver, &fast_config(tmp.path())).await.unwrap();

        assert_eq!(summary.total_failed, 1);
        assert_eq!(summary.directory_results[0].failures[0].reason, "MissingURL");
        assert!(driver.navigations().is_empty());
    }

    #[tokio::test]
    async fn existing_output_is_skipped_without_navigation() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), r#"{"name": "A", "doc_url": "https://x/sheet/a"}"#);
        std::fs::write(tmp.path().join("A.xlsx"), b"already here").unwrap();

        let driver = ScriptedDriver::new();
        let summary = run(&driver, &fast_config(tmp.path())).await.unwrap();

        assert_eq!(summary.total_skipped, 1);
        assert_eq!(summary.total_success, 0);
        assert!(driver.navigations().is_empty());
        // no new log lines either
        assert!(!tmp.path().join("downloaded_files.txt").exists());
    }

    #[tokio::test]
    async fn rerun_over_completed_directory_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), r#"{"name": "A", "doc_url": "https://x/sheet/a"}"#);

        let driver = ScriptedDriver::new();
        let config = fast_config(tmp.path());
        let first = run(&driver, &config).await.unwrap();
        assert_eq!(first.total_success, 1);

        let second = run(&driver, &config).await.unwrap();
        assert_eq!(second.total_success, 0);
        assert_eq!(second.total_skipped, 1);

        let log = std::fs::read_to_string(tmp.path().join("downloaded_files.txt")).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[tokio::test]
    async fn exhausted_selectors_fail_task_with_diagnostics_and_continue() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            tmp.path(),
            r#"{"name": "Broken", "doc_url": "https://x/doc/1"},
               {"name": "NoUrl"}"#,
        );

        let driver = ScriptedDriver::with_broken_step(crate::export::STEP_EXPORT);
        let summary = run(&driver, &fast_config(tmp.path())).await.unwrap();

        assert_eq!(summary.total_failed, 2);
        let dir = &summary.directory_results[0];
        assert_eq!(dir.failures[0].reason, "ElementNotFound");
        assert_eq!(dir.failures[1].reason, "MissingURL");

        // Diagnostic snapshot was produced for the selector failure.
        let debug_dir = tmp.path().join("debug");
        let entries: Vec<_> = std::fs::read_dir(&debug_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().any(|n| n.starts_with("1_Broken") && n.ends_with(".html")));
        assert!(entries.iter().any(|n| n.starts_with("1_Broken") && n.ends_with(".png")));
    }

    #[tokio::test]
    async fn parse_failure_becomes_zero_activity_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("data.json"), "{broken").unwrap();
        // a healthy sibling directory still gets processed
        let sub = tmp.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        write_manifest(&sub, r#"{"name": "A", "doc_url": "https://x/doc/a"}"#);

        let driver = ScriptedDriver::new();
        let summary = run(&driver, &fast_config(tmp.path())).await.unwrap();

        assert_eq!(summary.total_directories, 2);
        let broken = &summary.directory_results[0];
        assert_eq!(broken.status, "parse-error");
        assert_eq!(broken.success + broken.failed + broken.skipped, 0);
        assert_eq!(summary.total_success, 1);
    }

    #[tokio::test]
    async fn no_work_found_ends_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = ScriptedDriver::new();
        let summary = run(&driver, &fast_config(tmp.path())).await.unwrap();
        assert_eq!(summary.total_directories, 0);
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("nope");
        let driver = ScriptedDriver::new();
        assert!(run(&driver, &fast_config(&gone)).await.is_err());
    }
}
