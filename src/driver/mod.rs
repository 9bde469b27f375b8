//! Browser automation capability surface.
//!
//! The orchestrator drives the export UI through this trait only, so any
//! compliant automation backend (or a deterministic fake in tests) can be
//! substituted without touching orchestration logic.

#[cfg(feature = "browser")]
mod chrome;
mod cookies;

#[cfg(feature = "browser")]
pub use chrome::ChromeDriver;
pub use cookies::{load_cookie_specs, CookieSpec};

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no clickable element matched for {0}")]
    ElementNotFound(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

/// A CSS selector candidate with a short label for logging.
#[derive(Debug, Clone, Copy)]
pub struct Selector {
    pub css: &'static str,
    pub label: &'static str,
}

/// Capability set consumed by the orchestrator.
#[async_trait]
pub trait ExportDriver: Send + Sync {
    /// Navigate the session to a URL.
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Point subsequent downloads at `dir`.
    async fn set_download_dir(&self, dir: &Path) -> Result<(), DriverError>;

    /// Try candidates in order, each bounded by `each_wait`; click the first
    /// clickable match and return its index. Exhausting every candidate is
    /// `ElementNotFound`.
    async fn find_clickable(
        &self,
        step: &str,
        candidates: &[Selector],
        each_wait: Duration,
    ) -> Result<usize, DriverError>;

    /// Best-effort confirmation click: if exactly one visible affordance
    /// matching any label exists, click it. Absence is `Ok(false)`.
    async fn click_confirmation(&self, labels: &[&str]) -> Result<bool, DriverError>;

    /// Inject session cookies; returns how many were accepted.
    async fn inject_cookies(&self, cookies: &[CookieSpec]) -> Result<usize, DriverError>;

    /// Current page markup, for diagnostics.
    async fn page_source(&self) -> Result<String, DriverError>;

    /// PNG screenshot of the current page, for diagnostics.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;

    /// Tear the session down. Safe to call more than once.
    async fn close(&mut self);
}
