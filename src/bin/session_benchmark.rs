use std::env;
use std::f32::consts::PI;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use earmark::audio::{CaptureFormat, FeedBackend, OverflowPolicy};
use earmark::config::{DEFAULT_CHANNELS, DEFAULT_QUEUE_SLOTS, DEFAULT_SAMPLE_RATE, DEFAULT_WINDOW_MS};
use earmark::engine::scripted::{ScriptStep, ScriptedEngine};
use earmark::{ChannelListener, ListenerEvent, RecognitionService, ServiceConfig};

/// Synthetic benchmark harness for end-to-end session latency.
#[derive(Debug, Parser)]
#[command(about = "Benchmark identification sessions with synthetic windows")]
struct Args {
    /// Human-friendly label recorded in the output metrics
    #[arg(long, default_value = "synthetic")]
    label: String,

    /// Sessions to run back to back
    #[arg(long, default_value_t = 10)]
    sessions: usize,

    /// Windows the engine reports as "no match" before each result
    #[arg(long = "misses", default_value_t = 1)]
    misses: usize,

    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    #[arg(long, default_value_t = DEFAULT_CHANNELS)]
    channels: u16,

    #[arg(long = "window-ms", default_value_t = DEFAULT_WINDOW_MS)]
    window_ms: u64,

    #[arg(long = "queue-slots", default_value_t = DEFAULT_QUEUE_SLOTS)]
    queue_slots: usize,

    #[arg(long = "overflow-policy", value_enum, default_value_t = OverflowPolicy::DropOldest)]
    overflow_policy: OverflowPolicy,

    /// Directory handed to the engine (defaults to the temp dir)
    #[arg(long)]
    datastore: Option<PathBuf>,

    /// Give up on a session after this many milliseconds
    #[arg(long = "session-timeout-ms", default_value_t = 10_000)]
    session_timeout_ms: u64,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Metrics {
    completed: usize,
    latencies_ms: Vec<f64>,
}

impl Metrics {
    fn mean_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
    }

    fn max_latency_ms(&self) -> f64 {
        self.latencies_ms.iter().copied().fold(0.0, f64::max)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    ensure_args_valid(&args)?;
    let config = build_service_config(&args);
    let format = config.format;
    let (backend, feed) = FeedBackend::new();
    let engine = ScriptedEngine::new(build_script(&args));
    let service = RecognitionService::new(config, Box::new(engine), Box::new(backend))?;
    let (listener, events) = ChannelListener::new();
    service.set_listener(&listener);
    service.start()?;

    let window = synthesize_window(&format);
    let timeout = Duration::from_millis(args.session_timeout_ms);
    let mut metrics = Metrics::default();
    for _ in 0..args.sessions {
        service.start_session()?;
        let started = Instant::now();
        for _ in 0..=args.misses {
            feed.push_samples(window.clone());
        }
        match events.recv_timeout(timeout) {
            Ok(ListenerEvent::Result { .. }) => {
                metrics.completed += 1;
                metrics
                    .latencies_ms
                    .push(started.elapsed().as_secs_f64() * 1000.0);
            }
            Ok(ListenerEvent::Error { message, .. }) => bail!("session failed: {message}"),
            Err(RecvTimeoutError::Timeout) => service.stop_session(),
            Err(RecvTimeoutError::Disconnected) => break,
        }
        feed.discard_pending();
    }
    service.stop();
    let queue = service.queue_stats();

    println!(
        "session_metrics|label={}|sessions={}|completed={}|mean_latency_ms={:.2}|max_latency_ms={:.2}|pushed={}|pulled={}|dropped={}",
        args.label,
        args.sessions,
        metrics.completed,
        metrics.mean_latency_ms(),
        metrics.max_latency_ms(),
        queue.pushed,
        queue.pulled,
        queue.dropped
    );

    Ok(())
}

fn ensure_args_valid(args: &Args) -> Result<()> {
    if args.sessions == 0 {
        bail!("--sessions must be at least 1");
    }
    if args.session_timeout_ms == 0 {
        bail!("--session-timeout-ms must be at least 1");
    }
    Ok(())
}

fn build_service_config(args: &Args) -> ServiceConfig {
    let mut config = ServiceConfig::new(args.datastore.clone().unwrap_or_else(env::temp_dir));
    config.format = CaptureFormat::from_window_ms(args.sample_rate, args.channels, args.window_ms);
    config.queue_slots = args.queue_slots;
    config.overflow_policy = args.overflow_policy;
    config
}

/// `misses` no-match answers then one match, repeated for every session.
fn build_script(args: &Args) -> Vec<ScriptStep> {
    let mut script = Vec::with_capacity(args.sessions * (args.misses + 1));
    for session in 0..args.sessions {
        script.extend(std::iter::repeat_n(ScriptStep::NoMatch, args.misses));
        script.push(ScriptStep::Match(format!("session-{session}")));
    }
    script
}

fn synthesize_window(format: &CaptureFormat) -> Vec<i16> {
    let channels = usize::from(format.channels);
    let mut samples = Vec::with_capacity(format.window_samples());
    for n in 0..format.window_frames {
        let t = n as f32 / format.sample_rate as f32;
        let sample = ((2.0 * PI * 440.0 * t).sin() * 0.4 * f32::from(i16::MAX)) as i16;
        samples.extend(std::iter::repeat_n(sample, channels));
    }
    samples
}
