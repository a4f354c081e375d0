use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

const LOG_FILE: &str = "order-gate.log";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. When `logging.dir` is set and
/// writable, a daily rolling file layer is added; the returned guard must be
/// kept alive for buffered lines to be flushed.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("info,order_gate={},sqlx=warn", config.level))
    });

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let (file_layer, guard) = match config.dir.as_deref().and_then(writable_dir) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let file_logging_enabled = file_layer.is_some();
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed && file_logging_enabled {
        if let Some(dir) = &config.dir {
            eprintln!("Logging to: {}/{}", dir, LOG_FILE);
        }
    }
    guard
}

/// Minimal logging for one-shot CLI commands
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

// rolling::daily panics if it cannot create the first file
fn writable_dir(dir: &str) -> Option<&str> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", dir, e);
        return None;
    }
    let probe = std::path::Path::new(dir).join(".order_gate_write_test");
    match std::fs::OpenOptions::new().create(true).append(true).open(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            Some(dir)
        }
        Err(e) => {
            eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", dir, e);
            None
        }
    }
}
