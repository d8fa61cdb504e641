use clap::Parser;
use earmark::config::AppConfig;
use earmark::engine::scripted::ScriptStep;

#[derive(Debug, Parser, Clone)]
#[command(about = "Earmark", author, version)]
pub(crate) struct HarnessConfig {
    #[command(flatten)]
    pub(crate) app: AppConfig,

    /// Feed synthetic sine windows instead of the microphone
    #[arg(long, default_value_t = false)]
    pub(crate) synthetic: bool,

    /// Engine answers, one per window: none | fail:<msg> | <label>@<score> | <label>
    #[arg(long, value_delimiter = ',', value_name = "STEPS")]
    pub(crate) script: Vec<ScriptStep>,

    /// Synthetic windows fed per session
    #[arg(long, default_value_t = 3)]
    pub(crate) windows: usize,

    /// Sessions to run before exiting
    #[arg(long, default_value_t = 1)]
    pub(crate) sessions: usize,

    /// End a session that has not finished after this many seconds
    #[arg(long = "session-timeout-secs", default_value_t = 30)]
    pub(crate) session_timeout_secs: u64,

    /// Tone frequency for synthetic windows (Hz)
    #[arg(long = "tone-hz", default_value_t = 440.0)]
    pub(crate) tone_hz: f32,
}

impl HarnessConfig {
    pub(crate) fn validate(&mut self) -> anyhow::Result<()> {
        self.app.validate()?;
        if self.sessions == 0 {
            anyhow::bail!("--sessions must be at least 1");
        }
        if self.session_timeout_secs == 0 {
            anyhow::bail!("--session-timeout-secs must be at least 1");
        }
        if !self.tone_hz.is_finite() || self.tone_hz <= 0.0 {
            anyhow::bail!("--tone-hz must be a positive frequency");
        }
        Ok(())
    }
}
