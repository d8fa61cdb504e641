pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
mod lock;
pub mod service;
pub mod telemetry;

pub(crate) use lock::lock_or_recover;
pub use audio::{CaptureBackend, CaptureFormat, FeedBackend, MicrophoneBackend, SampleFeed};
pub use config::{AppConfig, ServiceConfig};
pub use engine::{EngineOptions, IdentificationResult, RecognitionEngine};
pub use error::ServiceError;
pub use listener::{ChannelListener, ListenerEvent, ResultListener};
pub use service::{RecognitionService, SessionState};
pub use telemetry::{init_tracing, tracing_log_path};
