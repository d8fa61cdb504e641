//! Caller-facing callbacks for identification outcomes.
//!
//! The service keeps only a [`Weak`] handle to the registered listener; once
//! the caller drops its `Arc`, notifications are silently skipped.

use crate::engine::IdentificationResult;
use crate::error::ServiceError;
use crate::lock_or_recover;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

pub trait ResultListener: Send + Sync {
    fn on_identification_result(&self, result: &IdentificationResult);

    fn on_identification_error(&self, error: &ServiceError);
}

#[derive(Default)]
pub(crate) struct ListenerSlot {
    inner: Mutex<Option<Weak<dyn ResultListener>>>,
}

impl ListenerSlot {
    pub(crate) fn set<L: ResultListener + 'static>(&self, listener: &Arc<L>) {
        let listener: Arc<dyn ResultListener> = listener.clone();
        *lock_or_recover(&self.inner, "listener slot") = Some(Arc::downgrade(&listener));
    }

    pub(crate) fn clear(&self) {
        *lock_or_recover(&self.inner, "listener slot") = None;
    }

    fn current(&self) -> Option<Arc<dyn ResultListener>> {
        lock_or_recover(&self.inner, "listener slot")
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn notify_result(&self, result: &IdentificationResult) {
        match self.current() {
            Some(listener) => listener.on_identification_result(result),
            None => debug!(result = %result, "no listener; identification result dropped"),
        }
    }

    pub(crate) fn notify_error(&self, error: &ServiceError) {
        match self.current() {
            Some(listener) => listener.on_identification_error(error),
            None => debug!(error = %error, "no listener; identification error dropped"),
        }
    }
}

/// Listener callback captured as a value, for channels and JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ListenerEvent {
    Result { payload: IdentificationResult },
    Error { kind: &'static str, message: String },
}

impl ListenerEvent {
    pub fn error(error: &ServiceError) -> Self {
        ListenerEvent::Error {
            kind: error.label(),
            message: error.to_string(),
        }
    }
}

/// Forwards every callback into an unbounded channel.
pub struct ChannelListener {
    sender: Sender<ListenerEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, Receiver<ListenerEvent>) {
        let (sender, receiver) = unbounded();
        (Arc::new(Self { sender }), receiver)
    }
}

impl ResultListener for ChannelListener {
    fn on_identification_result(&self, result: &IdentificationResult) {
        let _ = self.sender.send(ListenerEvent::Result {
            payload: result.clone(),
        });
    }

    fn on_identification_error(&self, error: &ServiceError) {
        let _ = self.sender.send(ListenerEvent::error(error));
    }
}
