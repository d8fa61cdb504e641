use super::{RecognitionService, SessionState};
use crate::audio::{CaptureBackend, CaptureFormat, FeedBackend, SampleFeed};
use crate::config::ServiceConfig;
use crate::engine::scripted::{CallJournal, EngineCall, EngineGate, ScriptStep, ScriptedEngine};
use crate::engine::IdentificationResult;
use crate::error::ServiceError;
use crate::listener::{ChannelListener, ListenerEvent};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::env;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    service: RecognitionService,
    feed: SampleFeed,
    journal: CallJournal,
    // Keeps the weakly held listener alive.
    listener: Arc<ChannelListener>,
    events: Receiver<ListenerEvent>,
    format: CaptureFormat,
}

fn small_config() -> ServiceConfig {
    let mut config = ServiceConfig::new(env::temp_dir());
    config.format = CaptureFormat::from_window_ms(8_000, 1, 250);
    config
}

fn harness_with(config: ServiceConfig, engine: ScriptedEngine) -> Harness {
    let journal = engine.journal();
    let (backend, feed) = FeedBackend::new();
    let format = config.format;
    let service = RecognitionService::new(config, Box::new(engine), Box::new(backend))
        .expect("service construction");
    let (listener, events) = ChannelListener::new();
    service.set_listener(&listener);
    service.start().expect("service start");
    Harness {
        service,
        feed,
        journal,
        listener,
        events,
        format,
    }
}

fn harness(script: Vec<ScriptStep>) -> Harness {
    harness_with(small_config(), ScriptedEngine::new(script))
}

fn gated_harness(script: Vec<ScriptStep>) -> (Harness, EngineGate) {
    let (engine, gate) = ScriptedEngine::new(script).gated();
    (harness_with(small_config(), engine), gate)
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn next_event(h: &Harness) -> ListenerEvent {
    h.events.recv_timeout(EVENT_TIMEOUT).expect("listener event")
}

fn result_event(payload: &str) -> ListenerEvent {
    ListenerEvent::Result {
        payload: IdentificationResult::new(payload),
    }
}

fn sample_value(value: i16) -> f32 {
    f32::from(value) / 32_768.0
}

fn session_calls(journal: &CallJournal) -> Vec<EngineCall> {
    journal
        .calls()
        .into_iter()
        .filter(|call| !matches!(call, EngineCall::Initialize(_) | EngineCall::Configure(_)))
        .collect()
}

#[test]
fn no_match_keeps_session_then_match_ends_it() {
    let mut config = ServiceConfig::new(env::temp_dir());
    config.engine.binary_threshold = 0.7;
    let engine = ScriptedEngine::new(vec![
        ScriptStep::NoMatch,
        ScriptStep::Match("track42".to_string()),
    ]);
    let h = harness_with(config, engine);
    assert_eq!(h.format.sample_rate, 11_025);
    assert_eq!(h.format.window_samples(), 22_050);

    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 1_000);
    wait_until("first identify", || h.journal.identify_count() == 1);
    assert!(h.service.is_session_running());
    assert_eq!(h.service.session_state(), SessionState::Active);
    assert!(h.events.try_recv().is_err());

    h.feed.push_window(&h.format, 2_000);
    assert_eq!(next_event(&h), result_event("track42"));
    assert!(!h.service.is_session_running());
    assert_eq!(h.service.session_state(), SessionState::Idle);

    h.service.stop();
    assert!(h.events.try_recv().is_err());
    assert_eq!(
        h.journal.calls()[2],
        EngineCall::Reset,
        "engine reset on capture start"
    );
    assert!(h.journal.calls().contains(&EngineCall::Identify {
        samples: 22_050,
        first_sample: sample_value(1_000),
    }));
}

#[test]
fn capture_error_reports_once_and_idles() {
    let h = harness(vec![]);
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 10);
    wait_until("identify", || h.journal.identify_count() == 1);

    h.feed.fail("microphone unplugged");
    match next_event(&h) {
        ListenerEvent::Error { kind, message } => {
            assert_eq!(kind, "capture");
            assert!(message.contains("microphone unplugged"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!h.service.is_session_running());
    assert!(h.service.is_running());

    h.service.stop();
    assert!(h.events.try_recv().is_err());
}

#[test]
fn autodiscovery_delivers_every_result_without_stopping() {
    let h = harness(vec![
        ScriptStep::Match("one".to_string()),
        ScriptStep::NoMatch,
        ScriptStep::Match("two".to_string()),
        ScriptStep::Match("three".to_string()),
    ]);
    h.service.set_autodiscovery(true);
    assert!(h.service.autodiscovery());
    h.service.start_session().unwrap();
    assert_eq!(h.service.session_state(), SessionState::Autodiscovering);

    for value in 1..=4 {
        h.feed.push_window(&h.format, value);
    }
    assert_eq!(next_event(&h), result_event("one"));
    assert_eq!(next_event(&h), result_event("two"));
    assert_eq!(next_event(&h), result_event("three"));
    assert!(h.service.is_session_running());
    assert_eq!(h.journal.identify_count(), 4);

    h.service.stop_session();
    assert!(!h.service.is_session_running());
    h.service.stop();
    assert!(h.events.try_recv().is_err());
    // One reset on capture start plus one per accepted result.
    assert_eq!(h.journal.reset_count(), 4);
}

#[test]
fn disabling_autodiscovery_ends_at_next_result() {
    let h = harness(vec![
        ScriptStep::Match("one".to_string()),
        ScriptStep::Match("two".to_string()),
    ]);
    h.service.set_autodiscovery(true);
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 1);
    assert_eq!(next_event(&h), result_event("one"));
    assert!(h.service.is_session_running());

    h.service.set_autodiscovery(false);
    h.feed.push_window(&h.format, 2);
    assert_eq!(next_event(&h), result_event("two"));
    assert!(!h.service.is_session_running());
}

#[test]
fn start_session_is_idempotent() {
    let h = harness(vec![ScriptStep::Match("only".to_string())]);
    h.service.start_session().unwrap();
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 5);
    assert_eq!(next_event(&h), result_event("only"));
    h.service.stop();

    // A single capture start: one reset for it, one after the result.
    assert_eq!(h.journal.reset_count(), 2);
    assert_eq!(h.journal.identify_count(), 1);
}

#[test]
fn start_session_requires_running_service() {
    let (backend, _feed) = FeedBackend::new();
    let service = RecognitionService::new(
        small_config(),
        Box::new(ScriptedEngine::new(vec![])),
        Box::new(backend),
    )
    .unwrap();
    assert_eq!(service.start_session(), Err(ServiceError::NotRunning));
    assert!(!service.is_running());
    assert!(!service.is_session_running());
}

#[test]
fn stop_without_session_returns_promptly() {
    let h = harness(vec![]);
    assert!(h.service.is_running());
    let started = Instant::now();
    h.service.stop();
    assert!(started.elapsed() < EVENT_TIMEOUT);
    assert!(!h.service.is_running());

    // Repeated stops are no-ops.
    h.service.stop();
    h.service.stop_session();
    assert!(h.events.try_recv().is_err());
}

#[test]
fn service_restarts_after_stop() {
    let h = harness(vec![
        ScriptStep::Match("before".to_string()),
        ScriptStep::Match("after".to_string()),
    ]);
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 1);
    assert_eq!(next_event(&h), result_event("before"));
    h.service.stop();

    h.service.start().unwrap();
    assert!(h.service.is_running());
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 2);
    assert_eq!(next_event(&h), result_event("after"));
}

#[test]
fn buffers_after_completion_are_reclaimed_without_engine_calls() {
    let (h, gate) = gated_harness(vec![ScriptStep::Match("first".to_string())]);
    h.service.start_session().unwrap();
    for value in 1..=3 {
        h.feed.push_window(&h.format, value);
    }
    wait_until("three windows queued", || h.service.queue_stats().pushed == 3);

    gate.release(1);
    assert_eq!(next_event(&h), result_event("first"));
    wait_until("queued windows drained", || h.service.queue_stats().pulled == 3);

    assert_eq!(h.journal.identify_count(), 1);
    assert_eq!(h.service.queue_stats().dropped, 0);
    drop(gate);
}

#[test]
fn new_session_never_sees_previous_session_audio() {
    let (h, gate) = gated_harness(vec![
        ScriptStep::Match("first".to_string()),
        ScriptStep::Match("second".to_string()),
    ]);
    h.service.start_session().unwrap();
    for value in [100, 200, 300] {
        h.feed.push_window(&h.format, value);
    }
    wait_until("three windows queued", || h.service.queue_stats().pushed == 3);
    gate.release(1);
    assert_eq!(next_event(&h), result_event("first"));

    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 900);
    drop(gate);
    assert_eq!(next_event(&h), result_event("second"));

    let window = h.format.window_samples();
    assert_eq!(
        session_calls(&h.journal),
        vec![
            EngineCall::Reset,
            EngineCall::Identify {
                samples: window,
                first_sample: sample_value(100),
            },
            EngineCall::Results,
            EngineCall::Reset,
            EngineCall::Reset,
            EngineCall::Identify {
                samples: window,
                first_sample: sample_value(900),
            },
            EngineCall::Results,
            EngineCall::Reset,
        ]
    );
}

#[test]
fn late_stop_from_previous_session_does_not_end_new_one() {
    let h = harness(vec![]);
    h.service.start_session().unwrap();
    wait_until("first capture start", || h.journal.reset_count() == 1);
    h.service.stop_session();
    h.service.start_session().unwrap();
    wait_until("second capture start", || h.journal.reset_count() == 2);

    // The first capture's stop event was queued before the second start.
    assert!(h.service.is_session_running());
    h.feed.push_window(&h.format, 3);
    wait_until("identify", || h.journal.identify_count() == 1);
    assert!(h.service.is_session_running());
}

#[test]
fn stop_drains_pending_buffers() {
    let (h, gate) = gated_harness(vec![]);
    h.service.start_session().unwrap();
    for value in 1..=3 {
        h.feed.push_window(&h.format, value);
    }
    wait_until("three windows queued", || h.service.queue_stats().pushed == 3);

    drop(gate);
    h.service.stop();
    assert!(!h.service.is_running());
    assert!(!h.service.is_session_running());
    assert_eq!(h.service.queue_stats().pulled, 3);
    assert!(h.events.try_recv().is_err());
}

#[test]
fn engine_failure_ends_session_but_not_service() {
    let h = harness(vec![
        ScriptStep::Fail("datastore corrupt".to_string()),
        ScriptStep::Match("recovered".to_string()),
    ]);
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 1);
    match next_event(&h) {
        ListenerEvent::Error { kind, message } => {
            assert_eq!(kind, "engine");
            assert!(message.contains("datastore corrupt"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!h.service.is_session_running());
    assert!(h.service.is_running());

    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 2);
    assert_eq!(next_event(&h), result_event("recovered"));
}

#[test]
fn handler_panic_reports_error_and_stops_loop() {
    let h = harness(vec![
        ScriptStep::Panic("engine exploded".to_string()),
        ScriptStep::Match("restarted".to_string()),
    ]);
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 1);
    match next_event(&h) {
        ListenerEvent::Error { kind, message } => {
            assert_eq!(kind, "engine");
            assert!(message.contains("engine exploded"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    wait_until("loop exit", || !h.service.is_running());
    assert!(!h.service.is_session_running());
    assert_eq!(h.service.start_session(), Err(ServiceError::NotRunning));

    h.service.start().unwrap();
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 2);
    assert_eq!(next_event(&h), result_event("restarted"));
}

#[test]
fn stereo_capture_is_downmixed_for_the_engine() {
    let mut config = small_config();
    config.format = CaptureFormat::from_window_ms(8_000, 2, 250);
    let h = harness_with(config, ScriptedEngine::new(vec![ScriptStep::Match("x".to_string())]));
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 8_192);
    assert_eq!(next_event(&h), result_event("x"));
    assert!(h.journal.calls().contains(&EngineCall::Identify {
        samples: 2_000,
        first_sample: 0.25,
    }));
}

#[test]
fn dropped_listener_is_not_kept_alive() {
    let mut h = harness(vec![ScriptStep::Match("unheard".to_string())]);
    let (replacement, _rx) = ChannelListener::new();
    drop(mem::replace(&mut h.listener, replacement));
    h.service.start_session().unwrap();
    h.feed.push_window(&h.format, 1);
    wait_until("session end", || !h.service.is_session_running());
    assert!(h.events.try_recv().is_err());
}

#[test]
fn construction_rejects_missing_datastore() {
    let (backend, _feed) = FeedBackend::new();
    let config = ServiceConfig::new(env::temp_dir().join("earmark-no-such-datastore"));
    let err = RecognitionService::new(config, Box::new(ScriptedEngine::new(vec![])), Box::new(backend))
        .err()
        .expect("construction should fail");
    assert!(matches!(err, ServiceError::Config(_)));
    assert!(err.is_construction());
}

#[test]
fn construction_reports_engine_init_failure() {
    let (backend, _feed) = FeedBackend::new();
    let engine = ScriptedEngine::new(vec![]).failing_init("datastore schema mismatch");
    let err = RecognitionService::new(small_config(), Box::new(engine), Box::new(backend))
        .err()
        .expect("construction should fail");
    assert_eq!(
        err,
        ServiceError::EngineInit("datastore schema mismatch".to_string())
    );
}

#[test]
fn engine_receives_configured_options() {
    let mut config = small_config();
    config.engine.binary_threshold = 0.55;
    let expected = config.engine;
    let engine = ScriptedEngine::new(vec![]);
    let journal = engine.journal();
    let (backend, _feed) = FeedBackend::new();
    let _service = RecognitionService::new(config, Box::new(engine), Box::new(backend)).unwrap();
    let calls = journal.calls();
    assert!(matches!(calls[0], EngineCall::Initialize(_)));
    assert_eq!(calls[1], EngineCall::Configure(expected));
}

/// Holds its first capture open after the stop request until released.
struct StallingBackend {
    stop_seen: Sender<()>,
    release: Receiver<()>,
    stalled: bool,
}

impl CaptureBackend for StallingBackend {
    fn capture(
        &mut self,
        _format: &CaptureFormat,
        stop: &AtomicBool,
        _sink: &mut dyn FnMut(&[i16]),
    ) -> anyhow::Result<()> {
        while !stop.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
        if !self.stalled {
            self.stalled = true;
            let _ = self.stop_seen.send(());
            let _ = self.release.recv_timeout(EVENT_TIMEOUT);
        }
        Ok(())
    }
}

#[test]
fn start_session_during_stop_leaves_nothing_running() {
    let (stop_seen_tx, stop_seen) = bounded(1);
    let (release, release_rx) = bounded(1);
    let backend = StallingBackend {
        stop_seen: stop_seen_tx,
        release: release_rx,
        stalled: false,
    };
    let service = RecognitionService::new(
        small_config(),
        Box::new(ScriptedEngine::new(vec![])),
        Box::new(backend),
    )
    .expect("service construction");
    service.start().unwrap();
    service.start_session().unwrap();

    let late_start = thread::scope(|scope| {
        let stopper = scope.spawn(|| service.stop());
        // `stop` holds the source lock while it joins the stalled capture.
        stop_seen
            .recv_timeout(EVENT_TIMEOUT)
            .expect("capture saw the stop request");
        let starter = scope.spawn(|| service.start_session());
        thread::sleep(Duration::from_millis(20));
        release.send(()).unwrap();
        stopper.join().expect("stop thread");
        starter.join().expect("start_session thread")
    });

    assert_eq!(late_start, Err(ServiceError::NotRunning));
    assert!(!service.is_running());
    assert!(!service.is_session_running());
}

/// Its capture thread dies before the capture call, outside the panic guard.
struct CrashingBackend;

impl CaptureBackend for CrashingBackend {
    fn capture(
        &mut self,
        _format: &CaptureFormat,
        _stop: &AtomicBool,
        _sink: &mut dyn FnMut(&[i16]),
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        panic!("backend registry corrupted")
    }
}

#[test]
fn stop_reports_interrupted_shutdown_once_and_still_stops() {
    let service = RecognitionService::new(
        small_config(),
        Box::new(ScriptedEngine::new(vec![])),
        Box::new(CrashingBackend),
    )
    .expect("service construction");
    let (listener, events) = ChannelListener::new();
    service.set_listener(&listener);
    service.start().unwrap();
    service.start_session().unwrap();

    service.stop();
    match events.recv_timeout(EVENT_TIMEOUT).expect("listener event") {
        ListenerEvent::Error { kind, message } => {
            assert_eq!(kind, "interrupted_shutdown");
            assert!(message.contains("backend registry corrupted"), "{message}");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(events.try_recv().is_err());
    assert!(!service.is_running());
    assert!(!service.is_session_running());
}
