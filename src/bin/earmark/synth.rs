use earmark::audio::CaptureFormat;
use std::f32::consts::PI;

/// One capture window of an interleaved sine tone, starting at phase zero.
pub(crate) fn tone_window(format: &CaptureFormat, tone_hz: f32) -> Vec<i16> {
    let channels = usize::from(format.channels);
    let mut samples = Vec::with_capacity(format.window_samples());
    for n in 0..format.window_frames {
        let t = n as f32 / format.sample_rate as f32;
        let value = ((2.0 * PI * tone_hz * t).sin() * 0.4 * f32::from(i16::MAX)) as i16;
        samples.extend(std::iter::repeat_n(value, channels));
    }
    samples
}
