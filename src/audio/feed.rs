//! Channel-fed capture backend for synthetic input and tests.
//!
//! A [`SampleFeed`] handle pushes sample chunks (or a failure) to the backend
//! from any thread. Chunks sent while no capture is running wait in the
//! channel for the next one.

use super::source::{CaptureBackend, CaptureFormat};
use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const FEED_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
enum FeedItem {
    Samples(Vec<i16>),
    Fail(String),
    End,
}

#[derive(Debug, Clone)]
pub struct SampleFeed {
    sender: Sender<FeedItem>,
    pending: Receiver<FeedItem>,
}

impl SampleFeed {
    /// Queue interleaved samples for the current or next capture.
    pub fn push_samples(&self, samples: Vec<i16>) -> bool {
        self.sender.send(FeedItem::Samples(samples)).is_ok()
    }

    /// Queue exactly one window of a constant sample value.
    pub fn push_window(&self, format: &CaptureFormat, value: i16) -> bool {
        self.push_samples(vec![value; format.window_samples()])
    }

    /// Make the running capture fail with `message`.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.sender.send(FeedItem::Fail(message.into())).is_ok()
    }

    /// End the running capture as if the input ran dry.
    pub fn end(&self) -> bool {
        self.sender.send(FeedItem::End).is_ok()
    }

    /// Drop everything not yet consumed by a capture. Returns how many items
    /// were discarded.
    pub fn discard_pending(&self) -> usize {
        self.pending.try_iter().count()
    }
}

pub struct FeedBackend {
    receiver: Receiver<FeedItem>,
}

impl FeedBackend {
    pub fn new() -> (Self, SampleFeed) {
        let (sender, receiver) = unbounded();
        let pending = receiver.clone();
        (Self { receiver }, SampleFeed { sender, pending })
    }
}

impl CaptureBackend for FeedBackend {
    fn capture(
        &mut self,
        _format: &CaptureFormat,
        stop: &AtomicBool,
        sink: &mut dyn FnMut(&[i16]),
    ) -> Result<()> {
        while !stop.load(Ordering::Acquire) {
            match self.receiver.recv_timeout(FEED_POLL) {
                Ok(FeedItem::Samples(samples)) => sink(&samples),
                Ok(FeedItem::Fail(message)) => return Err(anyhow!(message)),
                Ok(FeedItem::End) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "feed"
    }
}
