//! Earmark harness entrypoint.
//!
//! Builds a recognition service around a scripted engine and either the
//! microphone or a synthetic tone feed, runs the requested sessions, and
//! prints every listener callback as a JSON line on stdout.

mod cli;
mod cli_utils;
mod runner;
mod synth;

use anyhow::Result;
use clap::Parser;
use earmark::audio::{CaptureBackend, FeedBackend, MicrophoneBackend, SampleFeed};
use earmark::engine::scripted::ScriptedEngine;
use earmark::{init_tracing, ChannelListener, RecognitionService};
use std::io;
use std::time::Duration;
use tracing::info;

use crate::cli::HarnessConfig;
use crate::cli_utils::list_input_devices;
use crate::runner::{run_session, SessionReport, SyntheticInput};

fn main() -> Result<()> {
    let mut config = HarnessConfig::parse();
    if config.app.list_input_devices {
        list_input_devices()?;
        return Ok(());
    }

    config.validate()?;
    if let Some(path) = init_tracing(&config.app) {
        eprintln!("earmark: tracing to {}", path.display());
    }
    let service_config = config.app.service_config()?;
    let format = service_config.format;

    let (backend, feed): (Box<dyn CaptureBackend>, Option<SampleFeed>) = if config.synthetic {
        let (backend, feed) = FeedBackend::new();
        (Box::new(backend), Some(feed))
    } else {
        (
            Box::new(MicrophoneBackend::new(config.app.input_device.clone())),
            None,
        )
    };
    let engine = ScriptedEngine::new(config.script.clone());

    let service = RecognitionService::new(service_config, Box::new(engine), backend)?;
    let (listener, events) = ChannelListener::new();
    service.set_listener(&listener);
    service.start()?;

    let window = synth::tone_window(&format, config.tone_hz);
    let timeout = Duration::from_secs(config.session_timeout_secs);
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut totals = SessionReport::default();
    for session in 1..=config.sessions {
        let input = feed.as_ref().map(|feed| SyntheticInput {
            feed,
            window: &window,
            windows: config.windows,
        });
        let report = run_session(&service, &events, session, input, timeout, &mut out)?;
        totals.results += report.results;
        totals.errors += report.errors;
        totals.timed_out |= report.timed_out;
    }

    service.stop();
    info!(
        sessions = config.sessions,
        results = totals.results,
        errors = totals.errors,
        timed_out = totals.timed_out,
        queue = ?service.queue_stats(),
        "harness finished"
    );
    Ok(())
}
