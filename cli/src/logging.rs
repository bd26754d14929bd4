//! Tracing setup for the rackplan binary
//!
//! Logs go to ~/.local/share/rackplan/logs/rackplan.log (or platform
//! equivalent) unless the settings ask for stderr. Stdout stays reserved
//! for command output.

use config::{LoggingSettings, PathManager};
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "warn,rackplan=info,rackplan_core=info";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn make_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(settings.filter.as_deref().unwrap_or(DEFAULT_FILTER))
    })
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(settings: &LoggingSettings) {
    if LOG_GUARD.get().is_some() {
        return;
    }

    if !settings.to_file {
        init_stderr_logging(settings);
        return;
    }

    match PathManager::log_file_path() {
        Some(path) => {
            if let Err(e) = init_file_logging(settings, &path) {
                eprintln!("[rackplan] Failed to open log file {:?}: {}", path, e);
                init_stderr_logging(settings);
            }
        }
        None => init_stderr_logging(settings),
    }
}

fn init_file_logging(settings: &LoggingSettings, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    // Keep the writer alive for the life of the process
    let _ = LOG_GUARD.set(guard);

    let subscriber = tracing_subscriber::registry().with(make_filter(settings)).with(
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true),
    );

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::info!("Logging initialized, writing to {:?}", path);
    }
    Ok(())
}

fn init_stderr_logging(settings: &LoggingSettings) {
    let subscriber = tracing_subscriber::registry().with(make_filter(settings)).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}
