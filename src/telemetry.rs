//! JSON trace output for the service and harness binaries.

use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;

static TRACE_FILE: OnceLock<Option<PathBuf>> = OnceLock::new();

pub fn tracing_log_path() -> PathBuf {
    env::var("EARMARK_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("earmark_trace.jsonl"))
}

/// `--logs` records per-window decisions; `--log-timings` alone keeps to
/// lifecycle events and identify latency.
fn trace_level(config: &AppConfig) -> LevelFilter {
    if config.logs {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Install the JSON trace writer once per process. Returns the trace file
/// when tracing is active.
pub fn init_tracing(config: &AppConfig) -> Option<PathBuf> {
    if !config.logging_enabled() {
        return None;
    }

    let level = trace_level(config);
    TRACE_FILE
        .get_or_init(|| {
            let path = tracing_log_path();
            let file = match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => file,
                Err(err) => {
                    eprintln!("earmark: cannot open trace log {}: {err}", path.display());
                    return None;
                }
            };
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_max_level(level)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(file)
                .with_thread_names(true)
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .ok()
                .map(|()| path)
        })
        .clone()
}
