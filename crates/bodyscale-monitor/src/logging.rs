//! Logging initialization.
//!
//! Measurements own stdout, so logs go to stderr. The production layout
//! also keeps a few days of JSON records on disk for post-mortems of
//! unattended weigh-ins.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Selects the production layout when set to `production`.
pub const ENV_VAR: &str = "BODYSCALE_ENV";

/// Fallback filter directive when `RUST_LOG` is unset.
pub const LEVEL_VAR: &str = "BODYSCALE_LOG_LEVEL";

/// Overrides where rolled log files are written.
pub const DIR_VAR: &str = "BODYSCALE_LOG_DIR";

/// File names look like `bodyscale-monitor.2026-10-18.log`.
pub const FILE_PREFIX: &str = "bodyscale-monitor";
const FILE_SUFFIX: &str = "log";

/// Daily files kept before the oldest is deleted.
pub const RETAINED_FILES: usize = 7;

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Whether `value` (the content of [`ENV_VAR`]) selects production logging.
#[must_use]
pub fn is_production(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("production"))
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over [`LEVEL_VAR`], which defaults to `info`.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed.
pub fn init(production: bool) -> anyhow::Result<()> {
    let log_level = std::env::var(LEVEL_VAR).unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    if production {
        let dir = log_directory_from(std::env::var(DIR_VAR).ok().as_deref());
        init_production(env_filter, &dir);
    } else {
        init_development(env_filter);
    }
    Ok(())
}

fn init_production(env_filter: EnvFilter, dir: &Path) {
    // journald adds its own timestamps
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true)
        .without_time()
        .with_ansi(false);

    let (file_layer, file_error) = match file_appender(dir) {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true);
            (Some(layer), None)
        }
        Err(error) => (None, Some(error)),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    match file_error {
        None => tracing::info!(dir = %dir.display(), "writing log files"),
        Some(error) => tracing::warn!(
            dir = %dir.display(),
            %error,
            "log files disabled, logging to stderr only"
        ),
    }
}

fn init_development(env_filter: EnvFilter) {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stderr_layer).init();
}

/// Build the daily appender for `dir`, creating the directory first.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or written.
pub fn file_appender(dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(FILE_PREFIX)
        .filename_suffix(FILE_SUFFIX)
        .max_log_files(RETAINED_FILES)
        .build(dir)?;
    Ok(appender)
}

/// Directory for rolled log files.
///
/// A non-empty `override_dir` (the content of [`DIR_VAR`]) wins. Otherwise
/// logs are per-user state: `$XDG_STATE_HOME/bodyscale/logs` on Linux, the
/// local data directory elsewhere, or `./logs` when no home is known.
#[must_use]
pub fn log_directory_from(override_dir: Option<&str>) -> PathBuf {
    if let Some(dir) = override_dir.map(str::trim).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    directories::ProjectDirs::from("", "", "bodyscale").map_or_else(
        || PathBuf::from("./logs"),
        |dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_local_dir())
                .join("logs")
        },
    )
}
