//! docpull - batch export of cloud-hosted documents.
//!
//! Walks a directory tree for manifests, drives a browser session through
//! each document's export menu, waits for the download to land on disk,
//! and reports the results.

mod cli;
mod config;
mod detect;
mod discovery;
mod driver;
mod export;
mod manifest;
mod models;
mod naming;
mod orchestrator;
mod report;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "docpull=debug"
    } else {
        "docpull=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
