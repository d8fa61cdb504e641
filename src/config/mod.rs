//! Command-line parsing, defaults, and the validated service configuration.

mod defaults;
mod validation;

use crate::audio::{CaptureFormat, OverflowPolicy};
use crate::engine::{EngineOptions, IdentificationMode, IdentificationType, MatchType};
use clap::Parser;
use std::path::PathBuf;

pub use defaults::{
    DEFAULT_BINARY_THRESHOLD, DEFAULT_CHANNELS, DEFAULT_QUEUE_SLOTS, DEFAULT_SAMPLE_RATE,
    DEFAULT_WINDOW_MS, MAX_CHANNELS, MAX_QUEUE_SLOTS, MAX_SAMPLE_RATE, MAX_WINDOW_MS,
    MIN_CHANNELS, MIN_QUEUE_SLOTS, MIN_SAMPLE_RATE, MIN_WINDOW_MS,
};

/// CLI options shared by the earmark binaries.
#[derive(Debug, Parser, Clone)]
#[command(about = "Earmark audio identification service", author, version)]
pub struct AppConfig {
    /// Directory holding the identification datastore
    #[arg(long, env = "EARMARK_DATASTORE", value_name = "DIR")]
    pub datastore: Option<PathBuf>,

    /// Fingerprint resolutions compared by the matcher
    #[arg(long = "match-type", value_enum, default_value_t = MatchType::MultiScale)]
    pub match_type: MatchType,

    /// How candidate matches are accepted
    #[arg(long = "identification-type", value_enum, default_value_t = IdentificationType::Binary)]
    pub identification_type: IdentificationType,

    /// Matcher strictness
    #[arg(long = "identification-mode", value_enum, default_value_t = IdentificationMode::Strict)]
    pub identification_mode: IdentificationMode,

    /// Minimum score for binary identification (0.0-1.0)
    #[arg(long = "binary-threshold", default_value_t = DEFAULT_BINARY_THRESHOLD)]
    pub binary_threshold: f32,

    /// Capture sample rate in Hz
    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Capture channel count
    #[arg(long, default_value_t = DEFAULT_CHANNELS)]
    pub channels: u16,

    /// Audio handed to the engine per identify call (milliseconds)
    #[arg(long = "window-ms", default_value_t = DEFAULT_WINDOW_MS)]
    pub window_ms: u64,

    /// Capture windows buffered between capture and recognition
    #[arg(long = "queue-slots", default_value_t = DEFAULT_QUEUE_SLOTS)]
    pub queue_slots: usize,

    /// What capture does when every queue slot is full
    #[arg(long = "overflow-policy", value_enum, default_value_t = OverflowPolicy::DropOldest)]
    pub overflow_policy: OverflowPolicy,

    /// Keep identifying after each result instead of ending the session
    #[arg(long, default_value_t = false)]
    pub autodiscovery: bool,

    /// Preferred audio input device name
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Write structured trace logs
    #[arg(long = "logs", default_value_t = false)]
    pub logs: bool,

    /// Disable all logging, overriding --logs and --log-timings
    #[arg(long = "no-logs", default_value_t = false)]
    pub no_logs: bool,

    /// Log per-identify latency (implies --logs)
    #[arg(long = "log-timings", default_value_t = false)]
    pub log_timings: bool,
}

impl AppConfig {
    pub fn logging_enabled(&self) -> bool {
        !self.no_logs && (self.logs || self.log_timings)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            match_type: self.match_type,
            identification_type: self.identification_type,
            identification_mode: self.identification_mode,
            binary_threshold: self.binary_threshold,
        }
    }

    pub fn capture_format(&self) -> CaptureFormat {
        CaptureFormat::from_window_ms(self.sample_rate, self.channels, self.window_ms)
    }
}

/// Everything [`crate::RecognitionService::new`] needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub datastore_dir: PathBuf,
    pub engine: EngineOptions,
    pub format: CaptureFormat,
    pub queue_slots: usize,
    pub overflow_policy: OverflowPolicy,
    pub autodiscovery: bool,
    pub log_timings: bool,
}

impl ServiceConfig {
    /// Defaults: 11025 Hz mono, 2 s windows, 5 slots, drop-oldest, binary
    /// identification at 0.7.
    pub fn new(datastore_dir: impl Into<PathBuf>) -> Self {
        Self {
            datastore_dir: datastore_dir.into(),
            engine: EngineOptions::default(),
            format: CaptureFormat::from_window_ms(
                DEFAULT_SAMPLE_RATE,
                DEFAULT_CHANNELS,
                DEFAULT_WINDOW_MS,
            ),
            queue_slots: DEFAULT_QUEUE_SLOTS,
            overflow_policy: OverflowPolicy::DropOldest,
            autodiscovery: false,
            log_timings: false,
        }
    }
}
