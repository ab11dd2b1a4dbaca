//! Tracing configuration and log routing.
//!
//! Pipeline runs, worker activity and HTTP requests all log through `tracing`. Output goes to
//! stdout using a compact formatter and to a file: `RAGINGEST_LOG_FILE` when set, otherwise
//! `logs/ragingest.log`. The file writer is non-blocking so that OCR and embedding workers do
//! not stall on log I/O.
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_ENV: &str = "RAGINGEST_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "ragingest.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Configure tracing subscribers for stdout and file logging.
///
/// `RUST_LOG` controls filtering and falls back to `default_level` when unset. Calling this
/// more than once is harmless: later calls leave the installed subscriber in place.
pub fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stdout_layer = fmt::layer().with_target(false).compact();
    let file_layer = file_writer().map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact()
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

fn file_writer() -> Option<NonBlocking> {
    match std::env::var(LOG_FILE_ENV) {
        Ok(path) if !path.trim().is_empty() => open_explicit_file(Path::new(&path)),
        _ => open_default_file(),
    }
}

fn open_explicit_file(path: &Path) -> Option<NonBlocking> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path);
    match file {
        Ok(file) => Some(keep_alive(tracing_appender::non_blocking(file))),
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}

fn open_default_file() -> Option<NonBlocking> {
    if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
        eprintln!("Failed to create {DEFAULT_LOG_DIR} directory: {err}");
        return None;
    }
    let appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_FILE);
    Some(keep_alive(tracing_appender::non_blocking(appender)))
}

fn keep_alive((writer, guard): (NonBlocking, WorkerGuard)) -> NonBlocking {
    // The guard flushes on drop; only the first one is retained for the process lifetime.
    let _ = LOG_GUARD.set(guard);
    writer
}
