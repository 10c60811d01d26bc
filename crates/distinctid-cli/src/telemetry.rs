//! Console logging for the CLI.
//!
//! Events go to stderr so stdout carries nothing but identifiers. The filter
//! comes from `RUST_LOG` and defaults to `info`; use
//! `RUST_LOG=distinctid=debug` to see buffer refills and epoch changes.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true)
                .with_target(true),
        )
        .try_init()?;
    Ok(())
}
