//! Recognition service: the control surface around the session loop.
//!
//! The service owns the capture source, the slot queue and the session loop
//! thread. Capture events are posted into the loop's mailbox and handled one
//! at a time; the engine is only ever called from the loop thread.

mod state;
#[cfg(test)]
mod tests;
mod worker;

pub use state::SessionState;

use crate::audio::{
    panic_message, CaptureBackend, CaptureSource, QueueStats, RingBufferQueue, SourceListener,
};
use crate::config::ServiceConfig;
use crate::engine::RecognitionEngine;
use crate::error::{Result, ServiceError};
use crate::listener::{ListenerSlot, ResultListener};
use crate::lock_or_recover;
use state::SessionFlags;
use std::mem;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use worker::{ControlMessage, Mailbox, SessionWorker};

enum WorkerSlot {
    Parked(SessionWorker),
    Running(JoinHandle<SessionWorker>),
    /// The loop thread died outside its panic guard; the engine went with it.
    Lost,
}

pub struct RecognitionService {
    config: ServiceConfig,
    flags: Arc<SessionFlags>,
    queue: Arc<RingBufferQueue>,
    source: Arc<Mutex<CaptureSource>>,
    listener: Arc<ListenerSlot>,
    mailbox: Arc<Mailbox>,
    worker: Mutex<WorkerSlot>,
}

impl RecognitionService {
    /// Validate `config`, open the engine's datastore and configure it.
    ///
    /// Fails with [`ServiceError::Config`] or [`ServiceError::EngineInit`];
    /// nothing is started yet.
    pub fn new(
        config: ServiceConfig,
        mut engine: Box<dyn RecognitionEngine>,
        backend: Box<dyn CaptureBackend>,
    ) -> Result<Self> {
        config.validate()?;
        engine
            .initialize(&config.datastore_dir)
            .map_err(|err| ServiceError::EngineInit(format!("{err:#}")))?;
        engine
            .configure(&config.engine)
            .map_err(|err| ServiceError::EngineInit(format!("{err:#}")))?;

        let queue = Arc::new(RingBufferQueue::new(
            config.queue_slots,
            &config.format.capture_buffer(),
            config.overflow_policy,
        ));
        let source = Arc::new(Mutex::new(CaptureSource::new(
            config.format,
            queue.clone(),
            backend,
        )));
        let flags = Arc::new(SessionFlags::new(config.autodiscovery));
        let listener = Arc::new(ListenerSlot::default());
        let worker = SessionWorker::new(
            engine,
            queue.clone(),
            source.clone(),
            flags.clone(),
            listener.clone(),
            config.log_timings,
        );

        info!(
            datastore = %config.datastore_dir.display(),
            sample_rate = config.format.sample_rate,
            channels = config.format.channels,
            window_ms = config.format.window_ms(),
            queue_slots = config.queue_slots,
            overflow = config.overflow_policy.label(),
            match_type = config.engine.match_type.label(),
            identification_type = config.engine.identification_type.label(),
            "recognition service created"
        );

        Ok(Self {
            config,
            flags,
            queue,
            source,
            listener,
            mailbox: Arc::new(Mailbox::default()),
            worker: Mutex::new(WorkerSlot::Parked(worker)),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Register the listener. Only a weak handle is kept.
    pub fn set_listener<L: ResultListener + 'static>(&self, listener: &Arc<L>) {
        self.listener.set(listener);
    }

    pub fn clear_listener(&self) {
        self.listener.clear();
    }

    /// Start the session loop. A no-op while it is already running.
    pub fn start(&self) -> Result<()> {
        let mut slot = lock_or_recover(&self.worker, "session worker");
        if self.flags.loop_running() {
            debug!("session loop already running; start ignored");
            return Ok(());
        }
        let worker = match mem::replace(&mut *slot, WorkerSlot::Lost) {
            WorkerSlot::Parked(worker) => worker,
            WorkerSlot::Running(handle) => match handle.join() {
                Ok(worker) => worker,
                Err(payload) => {
                    return Err(ServiceError::Engine(format!(
                        "session loop thread panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                }
            },
            WorkerSlot::Lost => {
                return Err(ServiceError::Engine(
                    "session worker was lost; construct a new service".to_string(),
                ))
            }
        };

        let inbox = self.mailbox.open();
        self.flags.set_loop_running(true);
        match thread::Builder::new()
            .name("earmark-session".to_string())
            .spawn(move || worker.run(inbox))
        {
            Ok(handle) => {
                *slot = WorkerSlot::Running(handle);
                info!("recognition service started");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "failed to spawn session loop");
                self.flags.set_loop_running(false);
                self.mailbox.close();
                Err(ServiceError::Spawn("session loop"))
            }
        }
    }

    /// Stop capture, let the loop drain its mailbox, and join it.
    ///
    /// Never fails: an interrupted shutdown is reported to the listener. A
    /// no-op when the loop is not running.
    pub fn stop(&self) {
        let mut slot = lock_or_recover(&self.worker, "session worker");
        let handle = match mem::replace(&mut *slot, WorkerSlot::Lost) {
            WorkerSlot::Running(handle) if handle.thread().id() == thread::current().id() => {
                *slot = WorkerSlot::Running(handle);
                warn!("stop called from a listener callback; ignored");
                return;
            }
            WorkerSlot::Running(handle) => handle,
            parked => {
                *slot = parked;
                debug!("recognition service not running; stop ignored");
                return;
            }
        };

        {
            let mut source = lock_or_recover(&self.source, "capture source");
            // New sessions are refused from here on; see `start_session`.
            self.flags.set_loop_running(false);
            self.flags.set_complete(true);
            if let Err(err) = source.stop() {
                warn!(error = %err, "capture did not shut down cleanly");
                self.listener.notify_error(&err);
            }
        }

        // Every event of the joined capture thread is already queued ahead of this.
        self.mailbox.post(ControlMessage::Quit);
        match handle.join() {
            Ok(worker) => *slot = WorkerSlot::Parked(worker),
            Err(payload) => {
                let err = ServiceError::InterruptedShutdown(format!(
                    "session loop thread panicked: {}",
                    panic_message(payload.as_ref())
                ));
                warn!(error = %err, "session loop lost during shutdown");
                self.listener.notify_error(&err);
            }
        }
        self.mailbox.close();
        self.flags.set_loop_running(false);
        info!(queue = ?self.queue.stats(), "recognition service stopped");
    }

    /// Begin an identification session. A no-op while one is active.
    pub fn start_session(&self) -> Result<()> {
        if !self.flags.loop_running() {
            return Err(ServiceError::NotRunning);
        }
        let mut source = lock_or_recover(&self.source, "capture source");
        // `stop` may have taken the source lock while this call waited on it.
        if !self.flags.loop_running() {
            return Err(ServiceError::NotRunning);
        }
        if !self.flags.is_complete() {
            debug!(state = %self.flags.state(), "session already active; start ignored");
            return Ok(());
        }

        // No producer is alive here, so stale windows go without racing new ones.
        self.queue.reset();
        let epoch = self.flags.next_epoch();
        self.flags.set_complete(false);
        let mailbox: Arc<dyn SourceListener> = self.mailbox.clone();
        match source.start(epoch, mailbox) {
            Ok(_) => {
                info!(epoch, state = %self.flags.state(), "session started");
                Ok(())
            }
            Err(err) => {
                self.flags.set_complete(true);
                warn!(epoch, error = %err, "session failed to start");
                Err(err)
            }
        }
    }

    /// End the current session. `is_session_running` is false on return;
    /// capture shutdown failures go to the listener.
    pub fn stop_session(&self) {
        let mut source = lock_or_recover(&self.source, "capture source");
        let was_active = !self.flags.is_complete();
        self.flags.set_complete(true);
        if let Err(err) = source.stop() {
            warn!(error = %err, "capture did not stop cleanly");
            self.listener.notify_error(&err);
        }
        if was_active {
            info!(epoch = self.flags.epoch(), "session stopped");
        }
    }

    /// Takes effect at the next accepted identification.
    pub fn set_autodiscovery(&self, enabled: bool) {
        self.flags.set_autodiscovery(enabled);
        debug!(enabled, "autodiscovery updated");
    }

    pub fn autodiscovery(&self) -> bool {
        self.flags.autodiscovery()
    }

    pub fn is_running(&self) -> bool {
        self.flags.loop_running()
    }

    pub fn is_session_running(&self) -> bool {
        !self.flags.is_complete()
    }

    pub fn session_state(&self) -> SessionState {
        self.flags.state()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

impl Drop for RecognitionService {
    fn drop(&mut self) {
        self.stop();
    }
}
