//! Capture lifecycle: owns the capture thread, fills queue slots from a
//! [`CaptureBackend`], and reports lifecycle events to a listener.
//!
//! Per started capture the listener observes `Started` once, then any number
//! of `BufferReady` with at most one `Error`, then exactly one `Stopped`.

use super::buffer::AudioBuffer;
use super::dispatch::SlotFiller;
use super::queue::{PushOutcome, RingBufferQueue};
use crate::error::ServiceError;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Shape of the windows the capture thread produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per window (per channel).
    pub window_frames: usize,
}

impl CaptureFormat {
    pub fn from_window_ms(sample_rate: u32, channels: u16, window_ms: u64) -> Self {
        let window_frames = ((u64::from(sample_rate) * window_ms) / 1000).max(1) as usize;
        Self {
            sample_rate,
            channels: channels.max(1),
            window_frames,
        }
    }

    /// Interleaved samples per window.
    pub fn window_samples(&self) -> usize {
        self.window_frames * usize::from(self.channels)
    }

    pub fn window_ms(&self) -> u64 {
        (self.window_frames as u64 * 1000) / u64::from(self.sample_rate.max(1))
    }

    /// Empty 16-bit window; the template for queue slots.
    pub fn capture_buffer(&self) -> AudioBuffer {
        AudioBuffer::int16(self.window_samples(), self.sample_rate, self.channels)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Started,
    BufferReady,
    Error(String),
    Stopped,
}

impl SourceEvent {
    pub fn label(&self) -> &'static str {
        match self {
            SourceEvent::Started => "source_start",
            SourceEvent::BufferReady => "buffer_ready",
            SourceEvent::Error(_) => "source_error",
            SourceEvent::Stopped => "source_stop",
        }
    }
}

/// Receives capture events on the capture thread. `session` is the epoch the
/// capture was started under.
pub trait SourceListener: Send + Sync {
    fn on_source_event(&self, session: u64, event: SourceEvent);
}

/// Produces interleaved 16-bit samples in the requested format.
///
/// `capture` runs on the capture thread. It returns `Ok(())` when `stop` is
/// raised or the input ends, and an error when the device fails. Any
/// platform stream must live inside the call.
pub trait CaptureBackend: Send {
    fn capture(
        &mut self,
        format: &CaptureFormat,
        stop: &AtomicBool,
        sink: &mut dyn FnMut(&[i16]),
    ) -> anyhow::Result<()>;

    fn name(&self) -> &'static str {
        "unknown_backend"
    }
}

pub struct CaptureSource {
    format: CaptureFormat,
    queue: Arc<RingBufferQueue>,
    backend: Option<Box<dyn CaptureBackend>>,
    thread: Option<JoinHandle<Box<dyn CaptureBackend>>>,
    stop_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl CaptureSource {
    pub fn new(
        format: CaptureFormat,
        queue: Arc<RingBufferQueue>,
        backend: Box<dyn CaptureBackend>,
    ) -> Self {
        Self {
            format,
            queue,
            backend: Some(backend),
            thread: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn format(&self) -> &CaptureFormat {
        &self.format
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the capture thread. Returns `Ok(false)` when already running.
    pub fn start(
        &mut self,
        session: u64,
        listener: Arc<dyn SourceListener>,
    ) -> Result<bool, ServiceError> {
        if self.is_running() {
            debug!(session, "capture already running; start ignored");
            return Ok(false);
        }
        self.reap()?;
        let Some(backend) = self.backend.take() else {
            return Err(ServiceError::Capture(
                "capture backend unavailable after a failed shutdown".to_string(),
            ));
        };

        self.stop_flag.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
        self.queue.resume();

        let worker = CaptureThread {
            backend,
            format: self.format,
            queue: self.queue.clone(),
            stop: self.stop_flag.clone(),
            running: self.running.clone(),
            session,
            listener,
        };
        match thread::Builder::new()
            .name("earmark-capture".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                info!(session, "capture started");
                self.thread = Some(handle);
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "failed to spawn capture thread");
                self.running.store(false, Ordering::Release);
                Err(ServiceError::Spawn("capture"))
            }
        }
    }

    /// Request the capture thread to finish and wait for it. A no-op when no
    /// capture thread exists.
    pub fn stop(&mut self) -> Result<(), ServiceError> {
        if self.thread.is_none() {
            return Ok(());
        }
        self.stop_flag.store(true, Ordering::Release);
        self.queue.interrupt();
        self.reap()
    }

    /// Join a finished (or stopping) capture thread and take the backend back.
    fn reap(&mut self) -> Result<(), ServiceError> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        let joined = handle.join();
        self.running.store(false, Ordering::Release);
        match joined {
            Ok(backend) => {
                self.backend = Some(backend);
                Ok(())
            }
            Err(payload) => Err(ServiceError::InterruptedShutdown(format!(
                "capture thread panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "capture source dropped during failed shutdown");
        }
    }
}

struct CaptureThread {
    backend: Box<dyn CaptureBackend>,
    format: CaptureFormat,
    queue: Arc<RingBufferQueue>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    session: u64,
    listener: Arc<dyn SourceListener>,
}

impl CaptureThread {
    fn run(mut self) -> Box<dyn CaptureBackend> {
        let session = self.session;
        let backend_name = self.backend.name();
        self.listener.on_source_event(session, SourceEvent::Started);

        let mut filler = SlotFiller::new(&self.format.capture_buffer());
        let mut windows = 0u64;
        let mut rejected = 0u64;
        let outcome = {
            let queue = &self.queue;
            let listener = &self.listener;
            let backend = &mut self.backend;
            let format = &self.format;
            let stop = &self.stop;
            panic::catch_unwind(AssertUnwindSafe(|| {
                let mut sink = |chunk: &[i16]| {
                    filler.push(chunk, queue, |pushed| match pushed {
                        PushOutcome::Rejected => rejected += 1,
                        PushOutcome::Queued | PushOutcome::ReplacedOldest => {
                            windows += 1;
                            listener.on_source_event(session, SourceEvent::BufferReady);
                        }
                    });
                };
                backend.capture(format, stop, &mut sink)
            }))
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(session, backend = backend_name, error = %format!("{err:#}"), "capture failed");
                self.listener
                    .on_source_event(session, SourceEvent::Error(format!("{err:#}")));
            }
            Err(payload) => {
                let message = format!(
                    "capture backend panicked: {}",
                    panic_message(payload.as_ref())
                );
                warn!(session, "{message}");
                self.listener
                    .on_source_event(session, SourceEvent::Error(message));
            }
        }

        info!(
            session,
            backend = backend_name,
            windows,
            rejected,
            partial_samples = filler.pending(),
            "capture stopped"
        );
        self.running.store(false, Ordering::Release);
        self.listener.on_source_event(session, SourceEvent::Stopped);
        self.backend
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
