//! Drives a live session or a simulation into a [`JsonLines`] sink.

use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use bodyscale_core::{
    BiometricProfile, BleTransport, MeasurementSimulator, ScaleConfig, ScaleError, ScaleSession,
    SessionState, SessionStats,
};
use tracing::{info, warn};

use crate::output::JsonLines;

/// Connect attempts before a retryable failure is reported.
pub const CONNECT_ATTEMPTS: u32 = 3;

/// Load the configuration at `path`, writing defaults there first if the
/// file does not exist.
///
/// # Errors
///
/// Returns an error if the file cannot be parsed or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<ScaleConfig> {
    if !path.exists() {
        match ScaleConfig::default().save(path) {
            Ok(()) => info!(path = %path.display(), "wrote default configuration"),
            Err(error) => warn!(path = %path.display(), %error, "using built-in defaults"),
        }
    }
    ScaleConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

/// Emit `count` simulated measurements, `interval` apart.
///
/// Returns how many were written before `count` was reached or `shutdown`
/// fired.
///
/// # Errors
///
/// Returns an error if a measurement cannot be produced or written.
pub async fn run_simulation<W, S>(
    mut simulator: MeasurementSimulator,
    count: u32,
    interval: Duration,
    out: &mut JsonLines<W>,
    shutdown: S,
) -> anyhow::Result<u32>
where
    W: Write,
    S: Future<Output = ()>,
{
    warn!("simulation mode: no scale is connected, readings are synthetic");
    let mut shutdown = std::pin::pin!(shutdown);
    let mut emitted = 0;
    while emitted < count {
        if emitted > 0 && !interval.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = &mut shutdown => break,
            }
        }
        let measurement = simulator.simulate_measurement()?;
        out.write(&measurement)?;
        emitted += 1;
    }
    info!(emitted, "simulation finished");
    Ok(emitted)
}

/// Scan, connect, subscribe and stream until the scale goes away or
/// `shutdown` fires. The session is always disconnected before returning.
///
/// # Errors
///
/// Returns the first session error that ends the run.
pub async fn run_live<T, W, S>(
    transport: T,
    profile: BiometricProfile,
    config: &ScaleConfig,
    out: JsonLines<W>,
    shutdown: S,
) -> Result<SessionStats, ScaleError>
where
    T: BleTransport,
    W: Write + Send + 'static,
    S: Future<Output = ()>,
{
    let mut session = ScaleSession::new(transport, profile, config.session_config());
    let outcome = stream(&mut session, config, out, shutdown).await;
    session.disconnect().await;
    outcome
}

async fn stream<T, W, S>(
    session: &mut ScaleSession<T>,
    config: &ScaleConfig,
    mut out: JsonLines<W>,
    shutdown: S,
) -> Result<SessionStats, ScaleError>
where
    T: BleTransport,
    W: Write + Send + 'static,
    S: Future<Output = ()>,
{
    let handles = session.scan(&config.scan_filter()).await?;
    let Some(device) = handles.into_iter().next() else {
        return Err(ScaleError::DeviceNotFound(config.scan_filter().describe()));
    };
    info!(device = %device.id, name = %device.display_name, "using scale");

    let mut attempt = 1;
    loop {
        match session.connect(&device).await {
            Ok(()) => break,
            Err(error)
                if error.is_retryable()
                    && attempt < CONNECT_ATTEMPTS
                    && session.state() == SessionState::DeviceSelected =>
            {
                warn!(attempt, %error, "connect failed, retrying");
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }

    session.subscribe().await?;
    session.on_measurement(move |measurement| {
        if let Err(error) = out.write(&measurement) {
            warn!(%error, "failed to write measurement");
        }
    });
    session.request_measurement().await?;

    let finished = tokio::select! {
        result = session.run() => Some(result),
        () = shutdown => None,
    };
    match finished {
        Some(result) => result,
        None => {
            info!("shutdown requested");
            Ok(session.stats())
        }
    }
}
