//! Tracing configuration and log routing.
//!
//! The pipeline logs to stderr using a compact formatter so stdout stays free for piping, and
//! optionally to a file. When `QACURATOR_LOG_FILE` is set, logs are appended to that path with a
//! non-blocking writer; batch jobs on shared clusters usually point it at a per-shard file.
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Configure tracing subscribers for stderr and optional file logging.
///
/// - `RUST_LOG` wins when set; otherwise `level` (e.g. from `--log-level`), then `info`.
/// - Installs a compact stderr layer and, when `QACURATOR_LOG_FILE` is set, a file layer.
/// - Safe to call more than once; later calls are ignored.
pub fn init_tracing(level: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let fallback = level
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "info".to_string());
        EnvFilter::try_new(&fallback).unwrap_or_else(|_| EnvFilter::new("info"))
    });
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer);

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
/// Returns `None` when the variable is unset or the target file cannot be opened.
fn configure_file_writer() -> Option<NonBlocking> {
    let path = std::env::var("QACURATOR_LOG_FILE").ok()?;
    match std::fs::OpenOptions::new()
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
    }
}
