//! # bodyscale-monitor
//!
//! Streams body-composition measurements as JSON lines.
//!
//! ## Running
//!
//! ```bash
//! # Live, BlueZ on Linux
//! cargo run --package bodyscale-monitor --features bluetooth
//!
//! # Synthetic readings, no hardware
//! cargo run --package bodyscale-monitor -- --simulate --count 5 --sex male --age 30 --height 175
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use bodyscale_core::{default_config_path, BiometricProfile, MeasurementSimulator, ScaleConfig};
use bodyscale_monitor::cli::Cli;
use bodyscale_monitor::logging;
use bodyscale_monitor::output::JsonLines;
use bodyscale_monitor::runner;
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(logging::is_production(
        std::env::var(logging::ENV_VAR).ok().as_deref(),
    ))?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting bodyscale-monitor");

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = runner::load_config(&config_path)?;
    let profile = cli.profile(&config)?;

    if cli.simulate {
        let simulator = match cli.seed {
            Some(seed) => MeasurementSimulator::seeded(profile, seed),
            None => MeasurementSimulator::new(profile),
        };
        let mut out = JsonLines::new(std::io::stdout());
        runner::run_simulation(simulator, cli.count, cli.interval(), &mut out, shutdown_signal())
            .await?;
        return Ok(());
    }

    if let Err(err) = run_scale(profile, &config).await {
        error!(code = err.error_code(), error = %err, "session ended with an error");
        return Err(err.into());
    }
    Ok(())
}

#[cfg(all(feature = "bluetooth", target_os = "linux"))]
async fn run_scale(
    profile: BiometricProfile,
    config: &ScaleConfig,
) -> Result<(), bodyscale_core::ScaleError> {
    use bodyscale_core::{BluerTransport, ScaleError, TransportError};

    let transport = BluerTransport::new(
        config.bluetooth.adapter.as_deref(),
        config.session.channel_capacity,
    )
    .await
    .map_err(|error| match error {
        TransportError::Unsupported(reason) => ScaleError::PlatformUnsupported(reason),
        other => ScaleError::PlatformUnsupported(other.to_string()),
    })?;

    let stats = runner::run_live(
        transport,
        profile,
        config,
        JsonLines::new(std::io::stdout()),
        shutdown_signal(),
    )
    .await?;
    info!(emitted = stats.emitted, discarded = stats.discarded, "session finished");
    Ok(())
}

#[cfg(not(all(feature = "bluetooth", target_os = "linux")))]
#[allow(clippy::unused_async)]
async fn run_scale(
    _profile: BiometricProfile,
    _config: &ScaleConfig,
) -> Result<(), bodyscale_core::ScaleError> {
    Err(bodyscale_core::ScaleError::PlatformUnsupported(
        "built without the `bluetooth` feature; pass --simulate for synthetic readings".into(),
    ))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("received ctrl-c");
}
