//! Tracing configuration and log routing.
//!
//! Logs go to stderr through a compact formatter and, optionally, to a file. When
//! `DOCTOKNOW_LOG_FILE` is set, logs are appended to that path; otherwise a file logger is created
//! under `logs/doctoknow.log`. Setting `DOCTOKNOW_LOG_FILE=off` disables the file layer, which the
//! stdio MCP binary relies on when it runs inside sandboxed hosts.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Configure tracing subscribers for stderr and optional file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Installs a compact stderr layer and, when available, a file layer.
/// - Uses a global guard to keep the non-blocking writer alive for the process lifetime.
///
/// Calling it twice is harmless; the second installation attempt is ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        let _ = registry.with(file_layer).try_init();
    } else {
        let _ = registry.try_init();
    }
}

/// Build a non-blocking writer for file logging.
///
/// Returns `None` when file logging is disabled, the logs directory cannot be created, or the
/// target file cannot be opened.
fn configure_file_writer() -> Option<NonBlocking> {
    match std::env::var("DOCTOKNOW_LOG_FILE") {
        Ok(path) if path.eq_ignore_ascii_case("off") => None,
        Ok(path) => match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                let _ = LOG_GUARD.set(guard);
                Some(non_blocking)
            }
            Err(err) => {
                eprintln!("Failed to open log file {path}: {err}");
                None
            }
        },
        Err(_) => {
            if let Err(err) = std::fs::create_dir_all("logs") {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            let file_appender = tracing_appender::rolling::never("logs", "doctoknow.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
    }
}
