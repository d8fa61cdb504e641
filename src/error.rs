use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Failures surfaced by the recognition service.
///
/// `Config` and `EngineInit` are returned synchronously from construction. The
/// remaining variants end the current session and reach the registered
/// listener exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("recognition engine failed to initialize: {0}")]
    EngineInit(String),

    #[error("audio capture failed: {0}")]
    Capture(String),

    #[error("recognition engine failed: {0}")]
    Engine(String),

    #[error("shutdown interrupted: {0}")]
    InterruptedShutdown(String),

    #[error("recognition service is not running")]
    NotRunning,

    #[error("failed to spawn {0} thread")]
    Spawn(&'static str),
}

impl ServiceError {
    /// Short tag used in structured logs and harness output.
    pub fn label(&self) -> &'static str {
        match self {
            ServiceError::Config(_) => "config",
            ServiceError::EngineInit(_) => "engine_init",
            ServiceError::Capture(_) => "capture",
            ServiceError::Engine(_) => "engine",
            ServiceError::InterruptedShutdown(_) => "interrupted_shutdown",
            ServiceError::NotRunning => "not_running",
            ServiceError::Spawn(_) => "spawn",
        }
    }

    pub fn is_construction(&self) -> bool {
        matches!(self, ServiceError::Config(_) | ServiceError::EngineInit(_))
    }
}
