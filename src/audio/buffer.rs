//! Fixed-capacity PCM buffers shared by the capture queue and the recognizer.
//!
//! Storage is allocated once. `resize` only moves the valid-sample mark, so a
//! buffer can be emptied and refilled for every window without reallocating.

use super::dispatch::downmix_into;
use super::resample::resample_to_rate;

/// Sample representation held by an [`AudioBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Int16,
    Float32,
}

#[derive(Debug, Clone)]
enum Samples {
    Int16(Vec<i16>),
    Float32(Vec<f32>),
}

/// Interleaved PCM with a fixed capacity and a logical length.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Samples,
    sample_rate: u32,
    channels: u16,
    valid: usize,
}

impl AudioBuffer {
    pub fn int16(capacity: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Samples::Int16(vec![0; capacity]),
            sample_rate,
            channels: channels.max(1),
            valid: 0,
        }
    }

    pub fn float32(capacity: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Samples::Float32(vec![0.0; capacity]),
            sample_rate,
            channels: channels.max(1),
            valid: 0,
        }
    }

    /// Empty buffer with the same format and capacity as `self`.
    pub fn empty_like(&self) -> Self {
        match self.format() {
            SampleFormat::Int16 => Self::int16(self.capacity(), self.sample_rate, self.channels),
            SampleFormat::Float32 => {
                Self::float32(self.capacity(), self.sample_rate, self.channels)
            }
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self.samples {
            Samples::Int16(_) => SampleFormat::Int16,
            Samples::Float32(_) => SampleFormat::Float32,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn capacity(&self) -> usize {
        match &self.samples {
            Samples::Int16(data) => data.len(),
            Samples::Float32(data) => data.len(),
        }
    }

    /// Number of valid samples (all channels).
    pub fn len(&self) -> usize {
        self.valid
    }

    pub fn is_empty(&self) -> bool {
        self.valid == 0
    }

    pub fn is_full(&self) -> bool {
        self.valid == self.capacity()
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.valid
    }

    /// Logically truncate (or extend over stale storage) to `len` samples,
    /// clamped to the capacity. Storage is never reallocated.
    pub fn resize(&mut self, len: usize) {
        self.valid = len.min(self.capacity());
    }

    /// Valid samples when the buffer holds 16-bit PCM.
    pub fn as_i16(&self) -> Option<&[i16]> {
        match &self.samples {
            Samples::Int16(data) => Some(&data[..self.valid]),
            Samples::Float32(_) => None,
        }
    }

    /// Valid samples when the buffer holds float PCM.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.samples {
            Samples::Float32(data) => Some(&data[..self.valid]),
            Samples::Int16(_) => None,
        }
    }

    /// Append as many samples as fit and return how many were taken.
    pub fn append_i16(&mut self, data: &[i16]) -> usize {
        let take = data.len().min(self.remaining());
        let start = self.valid;
        match &mut self.samples {
            Samples::Int16(dst) => dst[start..start + take].copy_from_slice(&data[..take]),
            Samples::Float32(dst) => {
                for (out, sample) in dst[start..start + take].iter_mut().zip(data) {
                    *out = i16_to_f32(*sample);
                }
            }
        }
        self.valid += take;
        take
    }

    /// Copy the valid samples of `other` into this buffer's storage, truncating
    /// to capacity and converting between sample formats if they differ.
    pub fn copy_from(&mut self, other: &AudioBuffer) {
        let take = other.len().min(self.capacity());
        match (&mut self.samples, &other.samples) {
            (Samples::Int16(dst), Samples::Int16(src)) => {
                dst[..take].copy_from_slice(&src[..take]);
            }
            (Samples::Float32(dst), Samples::Float32(src)) => {
                dst[..take].copy_from_slice(&src[..take]);
            }
            (Samples::Float32(dst), Samples::Int16(src)) => {
                for (out, sample) in dst[..take].iter_mut().zip(&src[..take]) {
                    *out = i16_to_f32(*sample);
                }
            }
            (Samples::Int16(dst), Samples::Float32(src)) => {
                for (out, sample) in dst[..take].iter_mut().zip(&src[..take]) {
                    *out = f32_to_i16(*sample);
                }
            }
        }
        self.sample_rate = other.sample_rate;
        self.channels = other.channels;
        self.valid = take;
    }

    /// Convert this buffer into `target`'s format: float samples in [-1, 1),
    /// `target`'s channel count and sample rate. The result is truncated to
    /// the target capacity, so it never exceeds the recognizer window.
    pub fn normalize_into(&self, target: &mut AudioBuffer) {
        let mut mono = Vec::with_capacity(self.valid);
        let source_channels = usize::from(self.channels);
        let target_channels = usize::from(target.channels);
        match &self.samples {
            Samples::Int16(data) => {
                let data = &data[..self.valid];
                if target_channels == 1 {
                    downmix_into(&mut mono, data, source_channels, i16_to_f32);
                } else {
                    mono.extend(data.iter().copied().map(i16_to_f32));
                }
            }
            Samples::Float32(data) => {
                let data = &data[..self.valid];
                if target_channels == 1 {
                    downmix_into(&mut mono, data, source_channels, |s| s);
                } else {
                    mono.extend_from_slice(data);
                }
            }
        }

        let converted = if self.sample_rate != target.sample_rate && target_channels == 1 {
            resample_to_rate(&mono, self.sample_rate, target.sample_rate)
        } else {
            mono
        };

        let take = converted.len().min(target.capacity());
        match &mut target.samples {
            Samples::Float32(dst) => dst[..take].copy_from_slice(&converted[..take]),
            Samples::Int16(dst) => {
                for (out, sample) in dst[..take].iter_mut().zip(&converted[..take]) {
                    *out = f32_to_i16(*sample);
                }
            }
        }
        target.valid = take;
    }
}

pub(crate) fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32_767.0).round() as i16
}
