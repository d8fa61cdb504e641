use super::buffer::AudioBuffer;
use super::queue::{PushOutcome, RingBufferQueue};
use crossbeam_channel::{Sender, TrySendError};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Append `data` as mono: each interleaved frame becomes the mean of its
/// converted samples. A trailing partial frame averages what it has.
pub(super) fn downmix_into<T, F>(out: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        out.extend(data.iter().map(|&sample| convert(sample)));
        return;
    }
    out.extend(data.chunks(channels).map(|frame| {
        let sum: f32 = frame.iter().map(|&sample| convert(sample)).sum();
        sum / frame.len() as f32
    }));
}

/// Accumulates captured samples into a staging window and hands every full
/// window to the queue. Lives on the capture thread.
pub(super) struct SlotFiller {
    staging: AudioBuffer,
}

impl SlotFiller {
    pub(super) fn new(template: &AudioBuffer) -> Self {
        Self {
            staging: template.empty_like(),
        }
    }

    /// Feed interleaved samples; `on_window` runs once per window pushed.
    pub(super) fn push<F>(&mut self, mut data: &[i16], queue: &RingBufferQueue, mut on_window: F)
    where
        F: FnMut(PushOutcome),
    {
        while !data.is_empty() {
            let taken = self.staging.append_i16(data);
            if taken == 0 {
                break;
            }
            data = &data[taken..];
            if self.staging.is_full() {
                let outcome = queue.push(&self.staging);
                self.staging.resize(0);
                on_window(outcome);
            }
        }
    }

    /// Samples waiting for the current window to fill.
    pub(super) fn pending(&self) -> usize {
        self.staging.len()
    }
}

/// Cuts device callbacks into fixed-size chunks for the capture thread. Runs
/// on the audio callback, so it never blocks: chunks that do not fit in the
/// channel are counted in `dropped`.
pub(super) struct FrameDispatcher {
    frame_samples: usize,
    channels: usize,
    downmix: bool,
    pending: Vec<f32>,
    sender: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

impl FrameDispatcher {
    pub(super) fn new(
        frame_samples: usize,
        channels: usize,
        downmix: bool,
        sender: Sender<Vec<f32>>,
        dropped: Arc<AtomicUsize>,
    ) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            channels: channels.max(1),
            downmix,
            pending: Vec::with_capacity(frame_samples * 2),
            sender,
            dropped,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], mut convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        if self.downmix {
            downmix_into(&mut self.pending, data, self.channels, convert);
        } else {
            self.pending.extend(data.iter().map(|&sample| convert(sample)));
        }

        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let frame = mem::replace(&mut self.pending, rest);
            match self.sender.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Capture thread is gone; nothing will read further chunks.
                    self.pending.clear();
                    return;
                }
            }
        }
    }
}
