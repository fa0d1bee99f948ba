#![doc = include_str!("../README.md")]

mod config;
mod scenario;
mod telemetry;

use clap::Parser;
use config::{CliArgs, ScenarioConfig};
use std::io::Write;
use telemetry::init_telemetry;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ScenarioConfig::try_from(args)?;

    init_telemetry(config.log_json)?;

    if cfg!(debug_assertions) {
        tracing::debug!("Running scenario with full config: {:#?}", config);
    }

    let stdout = std::io::stdout();
    let report = scenario::run(&config, |action| {
        let mut out = stdout.lock();
        match serde_json::to_string(action) {
            Ok(line) => {
                if let Err(e) = writeln!(out, "{line}") {
                    tracing::error!("Failed to write dispatched action: {e}");
                }
            }
            Err(e) => tracing::error!("Failed to encode dispatched action: {e}"),
        }
    })
    .await?;

    tracing::info!(
        dispatched = report.dispatched.len(),
        accepted = report.accepted,
        rejected = report.rejected,
        "Scenario finished"
    );

    // A failed create is a legitimate scenario, but the exit code says so.
    report.outcome?;
    Ok(())
}
