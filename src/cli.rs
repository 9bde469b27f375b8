//! Command-line entry point.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::config::{Config, CONFIG_FILE_NAME};
use crate::driver::{load_cookie_specs, ExportDriver};
use crate::{orchestrator, report};

#[derive(Parser)]
#[command(name = "docpull")]
#[command(about = "Batch export of cloud-hosted documents through browser-driven export menus")]
#[command(version)]
pub struct Cli {
    /// Root directory to scan for manifests
    root: Option<PathBuf>,

    /// Session cookie file (JSON list or name->value map)
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Run the browser without a visible window
    #[arg(long)]
    headless: bool,

    /// Override the per-document download timeout, in seconds
    #[arg(long)]
    download_timeout: Option<u64>,

    /// Configuration file (defaults to docpull.toml inside the root)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

fn expand(path: PathBuf) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn build_config(cli: &Cli) -> Result<Config> {
    let root = expand(cli.root.clone().unwrap_or_else(|| PathBuf::from(".")));
    let config_path = cli
        .config
        .clone()
        .map(expand)
        .unwrap_or_else(|| root.join(CONFIG_FILE_NAME));

    let mut config = Config::load(&config_path)?;
    config.root = root;
    if let Some(cookies) = &cli.cookies {
        config.cookie_file = expand(cookies.clone());
    }
    if cli.headless {
        config.headless = true;
    }
    if let Some(timeout) = cli.download_timeout {
        config.download_timeout_secs = timeout;
    }
    Ok(config)
}

/// Authenticate the session: inject cookies when a cookie file is present,
/// otherwise hand control to the operator for an interactive login.
async fn authenticate(driver: &dyn ExportDriver, config: &Config) -> Result<()> {
    if config.cookie_file.exists() {
        let cookies = load_cookie_specs(&config.cookie_file, &config.auth_domain)?;
        info!("Injecting {} cookies", cookies.len());
        // Cookies need an origin: open the auth domain first.
        driver
            .navigate(&format!("https://{}", config.auth_domain))
            .await
            .map_err(|e| anyhow::anyhow!("failed to open auth domain: {e}"))?;
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        driver
            .inject_cookies(&cookies)
            .await
            .map_err(|e| anyhow::anyhow!("cookie injection failed: {e}"))?;
        return Ok(());
    }

    warn!(
        "No cookie file at {}; log in manually",
        config.cookie_file.display()
    );
    if std::io::stdin().is_terminal() {
        println!("Sign in using the opened browser window, then press Enter to continue...");
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .context("failed to read confirmation")?;
    } else {
        warn!("stdin is not a terminal, continuing without authentication");
    }
    Ok(())
}

#[cfg(feature = "browser")]
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    info!("Root directory: {}", config.root.display());

    let mut driver = crate::driver::ChromeDriver::launch(config.headless)
        .await
        .context("browser launch failed")?;

    let result = {
        let driver_ref: &dyn ExportDriver = &driver;
        async {
            authenticate(driver_ref, &config).await?;
            orchestrator::run(driver_ref, &config).await
        }
    };

    // Interrupt aborts after the current blocking operation; teardown runs
    // on both paths.
    let outcome = tokio::select! {
        res = result => Some(res),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            None
        }
    };

    driver.close().await;

    match outcome {
        Some(Ok(summary)) => {
            report::write_artifact(&config.root, &summary)?;
            report::print_final_table(&summary);
        }
        Some(Err(e)) => return Err(e),
        None => {}
    }

    Ok(())
}

#[cfg(not(feature = "browser"))]
pub async fn run() -> Result<()> {
    anyhow::bail!("Browser support not compiled. Rebuild with: cargo build --features browser")
}
