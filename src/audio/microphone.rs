//! System microphone capture via CPAL.
//!
//! The stream lives inside [`CaptureBackend::capture`]: device callbacks are
//! chunked by a [`FrameDispatcher`] onto a bounded channel, and the capture
//! thread converts each chunk to the session format before handing it on.

use super::buffer::f32_to_i16;
use super::dispatch::FrameDispatcher;
use super::resample::RateConverter;
use super::source::{CaptureBackend, CaptureFormat};
use crate::lock_or_recover;
use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig, StreamError};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const CHUNK_MS: u64 = 20;
const CHANNEL_CAPACITY: usize = 64;
const POLL_INTERVAL: Duration = Duration::from_millis(CHUNK_MS);

/// List microphone names so the CLI can expose a human-friendly selector.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    Ok(names)
}

#[derive(Debug, Clone, Default)]
pub struct MicrophoneBackend {
    preferred_device: Option<String>,
}

impl MicrophoneBackend {
    /// `None` uses the host's default input device.
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }

    fn resolve_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match self.preferred_device.as_deref() {
            Some(name) => {
                let mut devices = host.input_devices().context("no input devices available")?;
                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| anyhow!("input device '{name}' not found"))
            }
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("no default input device available. {}", mic_permission_hint())),
        }
    }
}

impl CaptureBackend for MicrophoneBackend {
    fn capture(
        &mut self,
        format: &CaptureFormat,
        stop: &AtomicBool,
        sink: &mut dyn FnMut(&[i16]),
    ) -> Result<()> {
        let device = self.resolve_device()?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());
        let default_config = device.default_input_config()?;
        let sample_format = default_config.sample_format();
        let device_config: StreamConfig = default_config.into();
        let device_rate = device_config.sample_rate.0;
        let device_channels = usize::from(device_config.channels.max(1));
        let target_channels = usize::from(format.channels.max(1));

        let downmix = target_channels == 1;
        if !downmix && target_channels != device_channels {
            bail!(
                "'{device_name}' delivers {device_channels} channels; cannot capture {target_channels}"
            );
        }
        if !downmix && device_rate != format.sample_rate {
            bail!(
                "'{device_name}' runs at {device_rate}Hz; multi-channel capture needs {}Hz",
                format.sample_rate
            );
        }
        let out_channels = if downmix { 1 } else { device_channels };
        let mut converter = RateConverter::new(device_rate, format.sample_rate)
            .with_context(|| format!("'{device_name}' runs at an unusable rate"))?;

        info!(
            device = %device_name,
            sample_format = ?sample_format,
            device_rate,
            device_channels,
            target_rate = format.sample_rate,
            target_channels,
            "microphone stream opening"
        );

        let frame_samples = ((u64::from(device_rate) * CHUNK_MS) / 1000).max(1) as usize * out_channels;
        let (sender, receiver) = bounded::<Vec<f32>>(CHANNEL_CAPACITY);
        let dropped = Arc::new(AtomicUsize::new(0));
        let dispatcher = Arc::new(Mutex::new(FrameDispatcher::new(
            frame_samples,
            device_channels,
            downmix,
            sender,
            dropped.clone(),
        )));
        let stream_error = Arc::new(Mutex::new(None::<String>));

        let stream = match sample_format {
            SampleFormat::F32 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[f32], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, |sample| sample);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    record_stream_error(stream_error.clone()),
                    None,
                )?
            }
            SampleFormat::I16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[i16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, |sample| sample as f32 / 32_768.0);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    record_stream_error(stream_error.clone()),
                    None,
                )?
            }
            SampleFormat::U16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[u16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, |sample| (sample as f32 - 32_768.0) / 32_768.0);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    record_stream_error(stream_error.clone()),
                    None,
                )?
            }
            other => bail!("unsupported sample format: {other:?}"),
        };

        stream
            .play()
            .with_context(|| format!("failed to start '{device_name}'. {}", mic_permission_hint()))?;

        let mut chunks = 0u64;
        let mut converted = Vec::<i16>::new();
        let result = loop {
            if stop.load(Ordering::Acquire) {
                break Ok(());
            }
            let failure = lock_or_recover(&stream_error, "microphone error").take();
            if let Some(message) = failure {
                break Err(anyhow!("audio stream error on '{device_name}': {message}"));
            }
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => {
                    let frame = if converter.is_passthrough() {
                        frame
                    } else {
                        converter.convert_chunk(&frame)
                    };
                    converted.clear();
                    converted.extend(frame.iter().copied().map(f32_to_i16));
                    chunks += 1;
                    sink(&converted);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    break Err(anyhow!("audio stream from '{device_name}' disconnected"));
                }
            }
        };

        if let Err(err) = stream.pause() {
            debug!(error = %err, "failed to pause audio stream");
        }
        drop(stream);
        debug!(
            chunks,
            dropped_chunks = dropped.load(Ordering::Relaxed),
            "microphone stream closed"
        );
        result
    }

    fn name(&self) -> &'static str {
        "microphone"
    }
}

fn record_stream_error(
    slot: Arc<Mutex<Option<String>>>,
) -> impl FnMut(StreamError) + Send + 'static {
    move |err| {
        warn!(error = %err, "audio stream error");
        lock_or_recover(&slot, "microphone error").get_or_insert_with(|| err.to_string());
    }
}

pub(crate) fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}
