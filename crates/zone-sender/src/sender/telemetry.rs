//! # Logging
//!
//! Events are written to stderr through `tracing_subscriber::fmt` with thread
//! ids, source locations and local RFC 3339 timestamps.
//!
//! ## Filter precedence
//!
//! - `RUST_LOG`, when set and valid, always wins.
//! - Otherwise the level resolved by [`SenderConfig`] is used (`--log-level`,
//!   the zone override, the file's `log.level`, then `info`).
//!
//! [`SenderConfig`]: crate::sender::config::SenderConfig

use anyhow::Context;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry(default_level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level)
            .with_context(|| format!("invalid log level {default_level:?}"))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(())
}
