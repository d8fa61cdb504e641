//! The session loop: a single consumer that applies every capture event and
//! makes every engine call, strictly one message at a time.

use super::state::SessionFlags;
use crate::audio::{panic_message, AudioBuffer, CaptureSource, RingBufferQueue};
use crate::audio::{SourceEvent, SourceListener};
use crate::engine::{IdentificationResult, RecognitionEngine};
use crate::error::ServiceError;
use crate::listener::ListenerSlot;
use crate::lock_or_recover;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub(crate) enum ControlMessage {
    Source { epoch: u64, event: SourceEvent },
    Quit,
}

impl ControlMessage {
    fn label(&self) -> &'static str {
        match self {
            ControlMessage::Source { event, .. } => event.label(),
            ControlMessage::Quit => "quit",
        }
    }
}

/// Sending side of the session loop's inbox. Closed while the loop is down;
/// messages posted then are dropped.
#[derive(Default)]
pub(crate) struct Mailbox {
    sender: Mutex<Option<Sender<ControlMessage>>>,
}

impl Mailbox {
    /// Replace the inbox and return its receiving end.
    pub(crate) fn open(&self) -> Receiver<ControlMessage> {
        let (sender, receiver) = unbounded();
        *lock_or_recover(&self.sender, "session mailbox") = Some(sender);
        receiver
    }

    pub(crate) fn close(&self) {
        *lock_or_recover(&self.sender, "session mailbox") = None;
    }

    pub(crate) fn post(&self, message: ControlMessage) -> bool {
        let sender = lock_or_recover(&self.sender, "session mailbox").clone();
        let label = message.label();
        match sender {
            Some(sender) if sender.send(message).is_ok() => true,
            _ => {
                debug!(message = label, "session loop not accepting messages; dropped");
                false
            }
        }
    }
}

impl SourceListener for Mailbox {
    fn on_source_event(&self, session: u64, event: SourceEvent) {
        self.post(ControlMessage::Source {
            epoch: session,
            event,
        });
    }
}

/// State owned by the session loop thread. Handed back to the service when
/// the loop exits so it can be restarted.
pub(crate) struct SessionWorker {
    engine: Box<dyn RecognitionEngine>,
    queue: Arc<RingBufferQueue>,
    source: Arc<Mutex<CaptureSource>>,
    flags: Arc<SessionFlags>,
    listener: Arc<ListenerSlot>,
    scratch: AudioBuffer,
    clip: AudioBuffer,
    log_timings: bool,
}

enum Flow {
    Continue,
    Exit,
}

impl SessionWorker {
    pub(crate) fn new(
        engine: Box<dyn RecognitionEngine>,
        queue: Arc<RingBufferQueue>,
        source: Arc<Mutex<CaptureSource>>,
        flags: Arc<SessionFlags>,
        listener: Arc<ListenerSlot>,
        log_timings: bool,
    ) -> Self {
        let format = *lock_or_recover(&source, "capture source").format();
        Self {
            engine,
            queue,
            source,
            flags,
            listener,
            scratch: format.capture_buffer(),
            clip: AudioBuffer::float32(format.window_frames, format.sample_rate, 1),
            log_timings,
        }
    }

    pub(crate) fn run(mut self, inbox: Receiver<ControlMessage>) -> Self {
        info!(engine = self.engine.name(), "session loop started");
        while let Ok(message) = inbox.recv() {
            if let Flow::Exit = self.dispatch(message) {
                break;
            }
        }
        self.flags.set_loop_running(false);
        info!("session loop exited");
        self
    }

    fn dispatch(&mut self, message: ControlMessage) -> Flow {
        let (epoch, event) = match message {
            ControlMessage::Quit => return Flow::Exit,
            ControlMessage::Source { epoch, event } => (epoch, event),
        };
        let label = event.label();
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle(epoch, event))) {
            Ok(()) => Flow::Continue,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(event = label, panic = %message, "session handler panicked; stopping loop");
                self.end_session(self.flags.epoch());
                self.listener.notify_error(&ServiceError::Engine(format!(
                    "session handler panicked: {message}"
                )));
                Flow::Exit
            }
        }
    }

    fn handle(&mut self, epoch: u64, event: SourceEvent) {
        let current = epoch == self.flags.epoch();
        match event {
            SourceEvent::Started => {
                if !current || self.flags.is_complete() {
                    debug!(epoch, "stale capture start ignored");
                    return;
                }
                if let Err(err) = self.engine.reset() {
                    self.fail_session(epoch, ServiceError::Engine(format!("{err:#}")));
                    return;
                }
                debug!(epoch, "engine reset for new session");
            }
            SourceEvent::BufferReady => self.on_buffer_ready(epoch, current),
            SourceEvent::Error(message) => {
                if !current {
                    warn!(epoch, error = %message, "capture error from a previous session ignored");
                    return;
                }
                warn!(epoch, error = %message, "capture error ends session");
                self.fail_session(epoch, ServiceError::Capture(message));
            }
            SourceEvent::Stopped => {
                if current && self.end_session(epoch) {
                    info!(epoch, "capture ended; session idle");
                }
            }
        }
    }

    fn on_buffer_ready(&mut self, epoch: u64, current: bool) {
        // The queue was reset when the newer session started.
        if !current {
            debug!(epoch, "buffer-ready from a previous session ignored");
            return;
        }
        if self.flags.is_complete() {
            if self.queue.pull(&mut self.scratch) {
                debug!(epoch, "buffer discarded; no active session");
            }
            self.scratch.resize(0);
            return;
        }
        if !self.queue.pull(&mut self.scratch) {
            debug!(epoch, "buffer ready with empty queue; ignored");
            return;
        }

        self.scratch.normalize_into(&mut self.clip);
        self.scratch.resize(0);
        let started = Instant::now();
        let outcome = self.identify_clip();
        self.clip.resize(0);
        if self.log_timings {
            info!(
                epoch,
                identify_ms = started.elapsed().as_secs_f64() * 1000.0,
                "identify timing"
            );
        }

        match outcome {
            Ok(None) => debug!(epoch, "no match for window"),
            Ok(Some(result)) => self.on_result(epoch, result),
            Err(err) => self.fail_session(epoch, ServiceError::Engine(format!("{err:#}"))),
        }
    }

    fn identify_clip(&mut self) -> anyhow::Result<Option<IdentificationResult>> {
        let samples = self.clip.as_f32().unwrap_or(&[]);
        self.engine.identify(samples)?;
        self.engine.results()
    }

    fn on_result(&mut self, epoch: u64, result: IdentificationResult) {
        let reset = self.engine.reset();
        let autodiscovery = self.flags.autodiscovery();
        info!(epoch, result = %result, autodiscovery, "identification accepted");
        if !autodiscovery || reset.is_err() {
            self.end_session(epoch);
        }
        self.listener.notify_result(&result);
        if let Err(err) = reset {
            self.listener
                .notify_error(&ServiceError::Engine(format!("{err:#}")));
        }
    }

    /// End the session and report `error`, unless the session already ended.
    fn fail_session(&mut self, epoch: u64, error: ServiceError) {
        if self.end_session(epoch) {
            self.listener.notify_error(&error);
        } else {
            debug!(epoch, error = %error, "failure after session end not reported");
        }
    }

    /// Mark `epoch` complete and stop its capture while holding the source
    /// lock. Returns `false` when that session was already over.
    fn end_session(&mut self, epoch: u64) -> bool {
        let mut source = lock_or_recover(&self.source, "capture source");
        if self.flags.epoch() != epoch || self.flags.is_complete() {
            return false;
        }
        self.flags.set_complete(true);
        if let Err(err) = source.stop() {
            warn!(epoch, error = %err, "capture stop failed while ending session");
            self.listener.notify_error(&err);
        }
        true
    }
}
