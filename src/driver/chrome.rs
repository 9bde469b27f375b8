//! Chromium-backed export driver (CDP via chromiumoxide).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CookieSpec, DriverError, ExportDriver, Selector};

/// Interval between element lookups inside a bounded wait.
const FIND_POLL: Duration = Duration::from_millis(250);

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

/// One browser session driving the export UI.
pub struct ChromeDriver {
    browser: Option<Browser>,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromeDriver {
    /// Launch a Chrome session configured for unattended downloads.
    pub async fn launch(headless: bool) -> Result<Self> {
        let chrome_path = find_chrome()?;

        info!("Launching browser (headless={})", headless);
        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if !headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--window-size=1920,1080");

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        // Drive the CDP event loop until the connection drops.
        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open initial page")?;

        Ok(Self {
            browser: Some(browser),
            page,
            handler,
        })
    }
}

/// Find a Chrome executable on this machine.
fn find_chrome() -> Result<PathBuf> {
    for path in CHROME_PATHS {
        let p = Path::new(path);
        if p.exists() {
            info!("Found Chrome at: {}", path);
            return Ok(p.to_path_buf());
        }
    }

    for cmd in &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    info!("Found Chrome in PATH: {}", path);
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "Chrome/Chromium not found. Please install it:\n\
         - Ubuntu/Debian: sudo apt install chromium-browser\n\
         - Fedora: sudo dnf install chromium\n\
         - Or download from: https://www.google.com/chrome/"
    ))
}

fn protocol_err(e: impl std::fmt::Display) -> DriverError {
    DriverError::Protocol(e.to_string())
}

#[async_trait]
impl ExportDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn set_download_dir(&self, dir: &Path) -> Result<(), DriverError> {
        let Some(browser) = self.browser.as_ref() else {
            return Err(DriverError::Protocol("browser already closed".into()));
        };
        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(dir.to_string_lossy().to_string())
            .build()
            .map_err(DriverError::Protocol)?;
        browser.execute(params).await.map_err(protocol_err)?;
        debug!("Download directory set to {}", dir.display());
        Ok(())
    }

    async fn find_clickable(
        &self,
        step: &str,
        candidates: &[Selector],
        each_wait: Duration,
    ) -> Result<usize, DriverError> {
        for (i, selector) in candidates.iter().enumerate() {
            debug!(
                "Trying selector {}/{} for {}: {}",
                i + 1,
                candidates.len(),
                step,
                selector.label
            );
            let deadline = Instant::now() + each_wait;
            loop {
                if let Ok(element) = self.page.find_element(selector.css).await {
                    match element.click().await {
                        Ok(_) => {
                            info!("Clicked {} ({})", step, selector.label);
                            return Ok(i);
                        }
                        Err(e) => debug!("Element for {} not clickable yet: {}", step, e),
                    }
                }
                if Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(FIND_POLL).await;
            }
        }
        Err(DriverError::ElementNotFound(step.to_string()))
    }

    async fn click_confirmation(&self, labels: &[&str]) -> Result<bool, DriverError> {
        let labels_json = serde_json::to_string(labels).map_err(protocol_err)?;
        let script = format!(
            r#"(() => {{
                const labels = {labels_json};
                const nodes = Array.from(
                    document.querySelectorAll('button, [role="button"]')
                );
                for (const node of nodes) {{
                    const text = (node.textContent || '').trim();
                    if (!text) continue;
                    if (node.offsetParent === null) continue;
                    if (labels.some((l) => text.includes(l))) {{
                        node.click();
                        return true;
                    }}
                }}
                return false;
            }})()"#
        );
        let result = self.page.evaluate(script).await.map_err(protocol_err)?;
        Ok(result.into_value::<bool>().unwrap_or(false))
    }

    async fn inject_cookies(&self, cookies: &[CookieSpec]) -> Result<usize, DriverError> {
        let mut accepted = 0;
        for cookie in cookies {
            let Some(domain) = cookie.domain.as_deref() else {
                warn!("Cookie {} has no domain, skipping", cookie.name);
                continue;
            };
            let mut builder = CookieParam::builder()
                .name(&cookie.name)
                .value(&cookie.value)
                .domain(domain)
                .path(cookie.path.clone().unwrap_or_else(|| "/".to_string()))
                .secure(cookie.secure.unwrap_or(true));
            if let Some(http_only) = cookie.http_only {
                builder = builder.http_only(http_only);
            }
            if let Some(same_site) = cookie.same_site.as_deref() {
                let mapped = match same_site {
                    "Strict" => Some(CookieSameSite::Strict),
                    "Lax" => Some(CookieSameSite::Lax),
                    "None" => Some(CookieSameSite::None),
                    other => {
                        debug!("Unknown sameSite value {} on {}", other, cookie.name);
                        None
                    }
                };
                if let Some(mapped) = mapped {
                    builder = builder.same_site(mapped);
                }
            }

            match builder.build() {
                Ok(param) => match self.page.set_cookie(param).await {
                    Ok(_) => accepted += 1,
                    Err(e) => warn!("Failed to set cookie {}: {}", cookie.name, e),
                },
                Err(e) => warn!("Failed to build cookie {}: {}", cookie.name, e),
            }
        }
        info!("Injected {}/{} cookies", accepted, cookies.len());
        Ok(accepted)
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        self.page.content().await.map_err(protocol_err)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let params = CaptureScreenshotParams {
            format: Some(CaptureScreenshotFormat::Png),
            ..Default::default()
        };
        self.page.screenshot(params).await.map_err(protocol_err)
    }

    async fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Browser close failed: {}", e);
            }
            let _ = browser.wait().await;
        }
        self.handler.abort();
        info!("Browser closed");
    }
}
