#![doc = include_str!("../README.md")]

mod sender;

use clap::Parser;
use sender::config::{CliArgs, SenderConfig};
use sender::supervisor::{self, shutdown_signal};
use sender::telemetry::init_telemetry;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use zone_sender_core::EXIT_INVALID_CONFIG;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    // Logging depends on the resolved config, so failures here go to stderr.
    let config = match SenderConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("zone-sender: {e}");
            return ExitCode::from(e.exit_code());
        }
    };

    if let Err(e) = init_telemetry(&config.log_level) {
        eprintln!("zone-sender: {e:#}");
        return ExitCode::from(EXIT_INVALID_CONFIG);
    }
    log_startup_info(&config);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let code = match supervisor::run(config, shutdown).await {
        Ok(end) => {
            if let supervisor::SessionEnd::WorkerFailed { ordinal, error } = &end {
                tracing::error!(ordinal, "Exiting after worker failure: {error}");
            } else {
                tracing::info!("Sender shut down successfully");
            }
            end.exit_code()
        }
        Err(e) => e.exit_code(),
    };
    ExitCode::from(code)
}

fn log_startup_info(config: &SenderConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting sender for zone {} with full config: {:#?}",
            config.zone.name,
            config
        );
    } else {
        tracing::info!(
            "Starting sender for zone {} with {} workers",
            config.zone.name,
            config.zone.concurrency
        );
    }
}
