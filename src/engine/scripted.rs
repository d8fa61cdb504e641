//! Deterministic engine that answers from a script.
//!
//! Each `identify` consumes the next [`ScriptStep`]; once the script runs out
//! the fallback step answers. Every call is recorded in a shared
//! [`CallJournal`] so callers can assert on ordering.

use super::{EngineOptions, IdentificationResult, IdentificationType, RecognitionEngine};
use crate::lock_or_recover;
use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    NoMatch,
    Match(String),
    /// Accepted when the engine runs fuzzy, or when `score` clears the
    /// configured binary threshold.
    Scored { label: String, score: f32 },
    Fail(String),
    Panic(String),
}

impl FromStr for ScriptStep {
    type Err = anyhow::Error;

    /// `none` | `fail:<message>` | `<label>@<score>` | `<label>`
    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            bail!("empty script step");
        }
        if raw.eq_ignore_ascii_case("none") || raw == "-" {
            return Ok(ScriptStep::NoMatch);
        }
        if let Some(message) = raw.strip_prefix("fail:") {
            return Ok(ScriptStep::Fail(message.to_string()));
        }
        if let Some((label, score)) = raw.rsplit_once('@') {
            let score: f32 = score
                .parse()
                .map_err(|_| anyhow!("invalid score in script step '{raw}'"))?;
            if label.is_empty() {
                bail!("missing label in script step '{raw}'");
            }
            return Ok(ScriptStep::Scored {
                label: label.to_string(),
                score,
            });
        }
        Ok(ScriptStep::Match(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Initialize(PathBuf),
    Configure(EngineOptions),
    Identify { samples: usize, first_sample: f32 },
    Results,
    Reset,
}

/// Shared, append-only record of engine calls.
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl CallJournal {
    fn record(&self, call: EngineCall) {
        lock_or_recover(&self.calls, "engine journal").push(call);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        lock_or_recover(&self.calls, "engine journal").clone()
    }

    pub fn identify_count(&self) -> usize {
        lock_or_recover(&self.calls, "engine journal")
            .iter()
            .filter(|call| matches!(call, EngineCall::Identify { .. }))
            .count()
    }

    pub fn reset_count(&self) -> usize {
        lock_or_recover(&self.calls, "engine journal")
            .iter()
            .filter(|call| matches!(call, EngineCall::Reset))
            .count()
    }
}

/// Releases gated `identify` calls one at a time. Dropping the gate lets every
/// pending and future call through.
#[derive(Debug, Clone)]
pub struct EngineGate {
    sender: Sender<()>,
}

impl EngineGate {
    pub fn release(&self, calls: usize) {
        for _ in 0..calls {
            let _ = self.sender.send(());
        }
    }
}

pub struct ScriptedEngine {
    script: VecDeque<ScriptStep>,
    fallback: ScriptStep,
    options: EngineOptions,
    pending: Option<IdentificationResult>,
    journal: CallJournal,
    init_failure: Option<String>,
    gate: Option<Receiver<()>>,
}

impl ScriptedEngine {
    pub fn new(script: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback: ScriptStep::NoMatch,
            options: EngineOptions::default(),
            pending: None,
            journal: CallJournal::default(),
            init_failure: None,
            gate: None,
        }
    }

    /// Step used once the script is exhausted (default `NoMatch`).
    pub fn with_fallback(mut self, step: ScriptStep) -> Self {
        self.fallback = step;
        self
    }

    /// Make `initialize` fail with `message`.
    pub fn failing_init(mut self, message: impl Into<String>) -> Self {
        self.init_failure = Some(message.into());
        self
    }

    /// Make every `identify` wait for a token from the returned gate.
    pub fn gated(mut self) -> (Self, EngineGate) {
        let (sender, receiver) = unbounded();
        self.gate = Some(receiver);
        (self, EngineGate { sender })
    }

    pub fn journal(&self) -> CallJournal {
        self.journal.clone()
    }

    fn next_step(&mut self) -> ScriptStep {
        self.script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn accepts(&self, score: f32) -> bool {
        match self.options.identification_type {
            IdentificationType::Fuzzy => true,
            IdentificationType::Binary => score >= self.options.binary_threshold,
        }
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn initialize(&mut self, datastore_dir: &Path) -> Result<()> {
        self.journal
            .record(EngineCall::Initialize(datastore_dir.to_path_buf()));
        match &self.init_failure {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }

    fn configure(&mut self, options: &EngineOptions) -> Result<()> {
        self.journal.record(EngineCall::Configure(*options));
        self.options = *options;
        Ok(())
    }

    fn identify(&mut self, samples: &[f32]) -> Result<()> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        self.journal.record(EngineCall::Identify {
            samples: samples.len(),
            first_sample: samples.first().copied().unwrap_or(0.0),
        });
        match self.next_step() {
            ScriptStep::NoMatch => {}
            ScriptStep::Match(label) => self.pending = Some(IdentificationResult::new(label)),
            ScriptStep::Scored { label, score } => {
                if self.accepts(score) {
                    self.pending = Some(IdentificationResult::new(label));
                }
            }
            ScriptStep::Fail(message) => bail!(message),
            ScriptStep::Panic(message) => panic!("{message}"),
        }
        Ok(())
    }

    fn results(&mut self) -> Result<Option<IdentificationResult>> {
        self.journal.record(EngineCall::Results);
        Ok(self.pending.take())
    }

    fn reset(&mut self) -> Result<()> {
        self.journal.record(EngineCall::Reset);
        self.pending = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_script_steps() {
        assert_eq!("none".parse::<ScriptStep>().unwrap(), ScriptStep::NoMatch);
        assert_eq!(
            "track42".parse::<ScriptStep>().unwrap(),
            ScriptStep::Match("track42".to_string())
        );
        assert_eq!(
            "fail:db locked".parse::<ScriptStep>().unwrap(),
            ScriptStep::Fail("db locked".to_string())
        );
        assert_eq!(
            "track7@0.65".parse::<ScriptStep>().unwrap(),
            ScriptStep::Scored {
                label: "track7".to_string(),
                score: 0.65
            }
        );
        assert!("track@high".parse::<ScriptStep>().is_err());
        assert!("  ".parse::<ScriptStep>().is_err());
    }

    #[test]
    fn binary_threshold_gates_scored_matches() {
        let mut engine = ScriptedEngine::new([
            ScriptStep::Scored {
                label: "weak".to_string(),
                score: 0.5,
            },
            ScriptStep::Scored {
                label: "strong".to_string(),
                score: 0.9,
            },
        ]);
        engine.configure(&EngineOptions::default()).unwrap();

        engine.identify(&[0.0; 8]).unwrap();
        assert_eq!(engine.results().unwrap(), None);
        engine.identify(&[0.0; 8]).unwrap();
        assert_eq!(engine.results().unwrap(), Some(IdentificationResult::new("strong")));
    }

    #[test]
    fn fuzzy_accepts_any_score() {
        let mut engine = ScriptedEngine::new([ScriptStep::Scored {
            label: "weak".to_string(),
            score: 0.1,
        }]);
        let options = EngineOptions {
            identification_type: IdentificationType::Fuzzy,
            ..EngineOptions::default()
        };
        engine.configure(&options).unwrap();
        engine.identify(&[0.0; 8]).unwrap();
        assert_eq!(engine.results().unwrap(), Some(IdentificationResult::new("weak")));
    }

    #[test]
    fn reset_clears_pending_result_and_is_journaled() {
        let mut engine = ScriptedEngine::new([ScriptStep::Match("a".to_string())]);
        let journal = engine.journal();
        engine.identify(&[0.25, 0.5]).unwrap();
        engine.reset().unwrap();
        assert_eq!(engine.results().unwrap(), None);
        assert_eq!(
            journal.calls(),
            vec![
                EngineCall::Identify {
                    samples: 2,
                    first_sample: 0.25
                },
                EngineCall::Reset,
                EngineCall::Results,
            ]
        );
    }

    #[test]
    fn exhausted_script_uses_fallback() {
        let mut engine =
            ScriptedEngine::new([]).with_fallback(ScriptStep::Fail("offline".to_string()));
        let err = engine.identify(&[0.0]).unwrap_err();
        assert_eq!(err.to_string(), "offline");
    }

    #[test]
    fn failing_init_reports_message() {
        let mut engine = ScriptedEngine::new([]).failing_init("datastore missing");
        let err = engine.initialize(Path::new("/nowhere")).unwrap_err();
        assert_eq!(err.to_string(), "datastore missing");
    }
}
