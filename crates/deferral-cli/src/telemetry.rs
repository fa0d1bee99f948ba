//! Log output for the scenario runner.
//!
//! Logs go to stderr so stdout only carries the dispatched actions, one JSON
//! object per line. Verbosity follows `RUST_LOG` and defaults to `info`; use
//! `RUST_LOG=deferral=trace` to see every provisional action being queued.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
