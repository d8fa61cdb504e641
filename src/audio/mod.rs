//! Audio capture pipeline: fixed-capacity buffers, the slot queue between the
//! capture thread and the session loop, and the capture backends that fill it.
//!
//! Capture produces interleaved 16-bit windows of the configured length. The
//! session loop normalizes each window to mono float PCM before handing it to
//! the recognition engine.

mod buffer;
mod dispatch;
mod feed;
mod microphone;
mod queue;
mod resample;
mod source;

pub use buffer::{AudioBuffer, SampleFormat};
pub use feed::{FeedBackend, SampleFeed};
pub use microphone::{list_input_devices, MicrophoneBackend};
pub use queue::{OverflowPolicy, PushOutcome, QueueStats, RingBufferQueue};
pub use source::{CaptureBackend, CaptureFormat, CaptureSource, SourceEvent, SourceListener};

pub(crate) use source::panic_message;
