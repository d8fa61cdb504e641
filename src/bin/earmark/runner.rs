//! Drives sessions on a started service and prints listener events as JSON
//! lines.

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use earmark::audio::SampleFeed;
use earmark::{ListenerEvent, RecognitionService};
use serde::Serialize;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const EVENT_POLL: Duration = Duration::from_millis(50);
/// Events still in flight when the session flag flips.
const SETTLE: Duration = Duration::from_millis(100);

/// Audio pushed into a synthetic capture for one session.
pub(crate) struct SyntheticInput<'a> {
    pub(crate) feed: &'a SampleFeed,
    pub(crate) window: &'a [i16],
    pub(crate) windows: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct SessionReport {
    pub(crate) results: usize,
    pub(crate) errors: usize,
    pub(crate) timed_out: bool,
}

#[derive(Serialize)]
struct EventLine<'a> {
    session: usize,
    #[serde(flatten)]
    event: &'a ListenerEvent,
}

pub(crate) fn run_session<W: Write>(
    service: &RecognitionService,
    events: &Receiver<ListenerEvent>,
    session: usize,
    input: Option<SyntheticInput<'_>>,
    timeout: Duration,
    out: &mut W,
) -> Result<SessionReport> {
    let mut report = SessionReport::default();
    service.start_session()?;
    info!(session, state = %service.session_state(), "harness session started");

    if let Some(input) = &input {
        for _ in 0..input.windows {
            input.feed.push_samples(input.window.to_vec());
        }
        // Ends capture once the windows are consumed, which ends the session.
        input.feed.end();
    }

    let deadline = Instant::now() + timeout;
    loop {
        match events.recv_timeout(EVENT_POLL) {
            Ok(event) => emit(out, session, &event, &mut report)?,
            Err(RecvTimeoutError::Timeout) => {
                if !service.is_session_running() {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(session, "session timed out; stopping it");
                    report.timed_out = true;
                    service.stop_session();
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    while let Ok(event) = events.recv_timeout(SETTLE) {
        emit(out, session, &event, &mut report)?;
    }

    if let Some(input) = &input {
        let discarded = input.feed.discard_pending();
        if discarded > 0 {
            info!(session, discarded, "unconsumed synthetic input dropped");
        }
    }
    Ok(report)
}

fn emit<W: Write>(
    out: &mut W,
    session: usize,
    event: &ListenerEvent,
    report: &mut SessionReport,
) -> Result<()> {
    match event {
        ListenerEvent::Result { .. } => report.results += 1,
        ListenerEvent::Error { .. } => report.errors += 1,
    }
    serde_json::to_writer(&mut *out, &EventLine { session, event })?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use earmark::engine::scripted::{ScriptStep, ScriptedEngine};
    use earmark::engine::IdentificationResult;
    use earmark::{ChannelListener, FeedBackend, ServiceConfig};

    #[test]
    fn event_line_carries_session_number() {
        let mut out = Vec::new();
        let mut report = SessionReport::default();
        let event = ListenerEvent::Result {
            payload: IdentificationResult::new("track42"),
        };
        emit(&mut out, 2, &event, &mut report).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"session\":2,\"event\":\"result\",\"payload\":\"track42\"}\n"
        );
        assert_eq!(report.results, 1);
    }

    #[test]
    fn synthetic_session_reports_result() {
        let mut config = ServiceConfig::new(std::env::temp_dir());
        config.format = earmark::CaptureFormat::from_window_ms(8_000, 1, 250);
        let format = config.format;
        let engine = ScriptedEngine::new([ScriptStep::NoMatch, ScriptStep::Match("tone".to_string())]);
        let (backend, feed) = FeedBackend::new();
        let service =
            RecognitionService::new(config, Box::new(engine), Box::new(backend)).unwrap();
        let (listener, events) = ChannelListener::new();
        service.set_listener(&listener);
        service.start().unwrap();

        let window = vec![1_000i16; format.window_samples()];
        let mut out = Vec::new();
        let report = run_session(
            &service,
            &events,
            1,
            Some(SyntheticInput {
                feed: &feed,
                window: &window,
                windows: 3,
            }),
            Duration::from_secs(5),
            &mut out,
        )
        .unwrap();
        service.stop();

        assert_eq!(
            report,
            SessionReport {
                results: 1,
                errors: 0,
                timed_out: false
            }
        );
        assert!(String::from_utf8(out).unwrap().contains("\"payload\":\"tone\""));
    }

    #[test]
    fn input_ending_without_match_leaves_no_events() {
        let mut config = ServiceConfig::new(std::env::temp_dir());
        config.format = earmark::CaptureFormat::from_window_ms(8_000, 1, 250);
        let format = config.format;
        let (backend, feed) = FeedBackend::new();
        let service = RecognitionService::new(
            config,
            Box::new(ScriptedEngine::new([])),
            Box::new(backend),
        )
        .unwrap();
        let (listener, events) = ChannelListener::new();
        service.set_listener(&listener);
        service.start().unwrap();

        let window = vec![0i16; format.window_samples()];
        let mut out = Vec::new();
        let report = run_session(
            &service,
            &events,
            1,
            Some(SyntheticInput {
                feed: &feed,
                window: &window,
                windows: 2,
            }),
            Duration::from_secs(5),
            &mut out,
        )
        .unwrap();
        assert_eq!(report, SessionReport::default());
        assert!(out.is_empty());
        assert!(!service.is_session_running());
    }
}
