//! Call surface of the fingerprint recognition engine.
//!
//! The engine itself (fingerprint extraction, matching, scoring, the datastore
//! format) lives outside this crate. The session loop drives it through
//! [`RecognitionEngine`] and is the only caller, so implementations need not
//! be reentrant.

pub mod scripted;

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Which fingerprint resolutions the matcher compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchType {
    #[default]
    MultiScale,
    SingleScale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentificationType {
    Fuzzy,
    /// Accept a match only when its score clears `binary_threshold`.
    #[default]
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentificationMode {
    #[default]
    Strict,
    Easy,
}

impl MatchType {
    pub fn label(self) -> &'static str {
        match self {
            MatchType::MultiScale => "multi-scale",
            MatchType::SingleScale => "single-scale",
        }
    }
}

impl IdentificationType {
    pub fn label(self) -> &'static str {
        match self {
            IdentificationType::Fuzzy => "fuzzy",
            IdentificationType::Binary => "binary",
        }
    }
}

impl IdentificationMode {
    pub fn label(self) -> &'static str {
        match self {
            IdentificationMode::Strict => "strict",
            IdentificationMode::Easy => "easy",
        }
    }
}

/// Options handed to [`RecognitionEngine::configure`] once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineOptions {
    pub match_type: MatchType,
    pub identification_type: IdentificationType,
    pub identification_mode: IdentificationMode,
    pub binary_threshold: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            match_type: MatchType::default(),
            identification_type: IdentificationType::default(),
            identification_mode: IdentificationMode::default(),
            binary_threshold: crate::config::DEFAULT_BINARY_THRESHOLD,
        }
    }
}

/// Opaque payload the engine produces for an accepted identification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IdentificationResult(String);

impl IdentificationResult {
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for IdentificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentificationResult {
    fn from(payload: &str) -> Self {
        Self::new(payload)
    }
}

/// Adapter over a fingerprint recognizer.
///
/// `identify` receives one mono float window at the capture sample rate;
/// `results` is polled right after and returns `Some` once the engine has
/// accepted an identification. `reset` discards any partial match state.
pub trait RecognitionEngine: Send {
    /// Open the identification datastore. Called once before `configure`.
    fn initialize(&mut self, datastore_dir: &Path) -> Result<()>;

    fn configure(&mut self, options: &EngineOptions) -> Result<()>;

    fn identify(&mut self, samples: &[f32]) -> Result<()>;

    fn results(&mut self) -> Result<Option<IdentificationResult>>;

    fn reset(&mut self) -> Result<()>;

    fn name(&self) -> &'static str {
        "unknown_engine"
    }
}
