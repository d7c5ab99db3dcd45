mod cli;
mod dao;
mod error;
mod metrics;
mod model;
mod service;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{info, Level};

use cli::Args;
use service::RunOrchestrator;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let config = Args::parse().merge_with_config()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(if config.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    info!(
        "Config: feeds={}, feed_timeout={}s, feed_concurrency={}, geoip_db={}",
        config.feeds.len(),
        config.feed_timeout.as_secs(),
        config.feed_concurrency,
        config.geo.path.display()
    );

    let report = RunOrchestrator::new().run(&config).await;
    report.print_summary();

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
