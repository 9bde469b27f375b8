//! Runtime configuration.
//!
//! All timing and naming constants live here and are passed into the
//! orchestrator explicitly; nothing reads ambient module state. Values can
//! come from an optional `docpull.toml` and are overridden by CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detect::DetectorConfig;
use crate::export::ExportWaits;

/// Name of the optional configuration file looked up next to the root.
pub const CONFIG_FILE_NAME: &str = "docpull.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory scanned for manifests.
    #[serde(skip)]
    pub root: PathBuf,

    /// Session cookie input file.
    pub cookie_file: PathBuf,
    /// Per-directory manifest file name.
    pub manifest_name: String,
    /// Cumulative success log, relative to the root.
    pub download_log_name: String,
    /// Domain used to seed cookie injection and as cookie-domain default.
    pub auth_domain: String,
    /// Run the browser without a visible window.
    pub headless: bool,

    /// Navigation timeout per document page.
    pub page_load_timeout_secs: u64,
    /// Bounded wait for the primary menu element.
    pub element_wait_secs: u64,
    /// Bounded wait per fallback selector strategy.
    pub fallback_wait_secs: u64,
    /// Overall download wait per document.
    pub download_timeout_secs: u64,

    /// Settle after opening the file menu.
    pub menu_wait_secs: u64,
    /// Settle after clicking the export entry.
    pub click_wait_secs: u64,
    /// Settle before scanning for a confirmation dialog.
    pub confirm_wait_secs: u64,
    /// Settle after navigation before the page is considered interactive.
    pub settle_wait_secs: u64,

    /// Detector outer polling interval.
    pub poll_interval_secs: u64,
    /// Consecutive stable size readings required.
    pub stable_checks: u32,
    /// Cap on readings per stability vote.
    pub max_stability_checks: u32,

    /// Pause between documents within a directory.
    pub task_pause_secs: u64,
    /// Pause between directories.
    pub directory_pause_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            cookie_file: PathBuf::from("cookies.json"),
            manifest_name: "data.json".to_string(),
            download_log_name: "downloaded_files.txt".to_string(),
            auth_domain: "doc.weixin.qq.com".to_string(),
            headless: false,
            page_load_timeout_secs: 30,
            element_wait_secs: 15,
            fallback_wait_secs: 5,
            download_timeout_secs: 120,
            menu_wait_secs: 2,
            click_wait_secs: 1,
            confirm_wait_secs: 2,
            settle_wait_secs: 3,
            poll_interval_secs: 1,
            stable_checks: 3,
            max_stability_checks: 10,
            task_pause_secs: 2,
            directory_pause_secs: 3,
        }
    }
}

impl Config {
    /// Load from a TOML file, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn detector(&self) -> DetectorConfig {
        DetectorConfig {
            timeout: Duration::from_secs(self.download_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            stability_interval: Duration::from_secs(1),
            stable_checks_needed: self.stable_checks,
            max_stability_checks: self.max_stability_checks,
        }
    }

    pub fn export_waits(&self) -> ExportWaits {
        ExportWaits {
            element_wait: Duration::from_secs(self.element_wait_secs),
            fallback_wait: Duration::from_secs(self.fallback_wait_secs),
            menu_wait: Duration::from_secs(self.menu_wait_secs),
            click_wait: Duration::from_secs(self.click_wait_secs),
            confirm_wait: Duration::from_secs(self.confirm_wait_secs),
        }
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn settle_wait(&self) -> Duration {
        Duration::from_secs(self.settle_wait_secs)
    }

    pub fn task_pause(&self) -> Duration {
        Duration::from_secs(self.task_pause_secs)
    }

    pub fn directory_pause(&self) -> Duration {
        Duration::from_secs(self.directory_pause_secs)
    }
}
