//! Sample-rate conversion from the device rate to the session rate.
//!
//! With `high-quality-audio` the conversion goes through a rubato sinc
//! resampler; otherwise (or when rubato refuses the input) decimation runs a
//! windowed-sinc FIR before linear interpolation so out-of-band energy does
//! not fold into the fingerprinted band.

use anyhow::{anyhow, Result};
#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};
use std::f32::consts::PI;
#[cfg(feature = "high-quality-audio")]
use std::sync::atomic::{AtomicBool, Ordering};

pub(super) const MIN_RATE: u32 = 2_000;
pub(super) const MAX_RATE: u32 = 1_600_000;
// ~0.01x .. 8x
pub(super) const MIN_RESAMPLE_RATIO: f64 = 0.01;
pub(super) const MAX_RESAMPLE_RATIO: f64 = 8.0;
const MAX_ANTI_ALIAS_TAPS: usize = 129;
#[cfg(feature = "high-quality-audio")]
const SINC_CHUNK: usize = 256;

#[cfg(feature = "high-quality-audio")]
static SINC_FALLBACK_LOGGED: AtomicBool = AtomicBool::new(false);

/// Fixed-pair rate converter. Anti-alias taps are designed once; chunked
/// input runs through one long-lived stream so filter state carries across
/// chunk edges.
pub(crate) struct RateConverter {
    from_rate: u32,
    to_rate: u32,
    ratio: f64,
    anti_alias: Option<Vec<f32>>,
    #[cfg(feature = "high-quality-audio")]
    sinc: Option<SincStream>,
    fir: FirStream,
}

impl RateConverter {
    pub(crate) fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let ratio = check_rates(from_rate, to_rate)?;
        let anti_alias = (from_rate > to_rate).then(|| {
            let taps = anti_alias_tap_count(from_rate, to_rate);
            let cutoff = (to_rate as f32 * 0.5 / from_rate as f32).min(0.499);
            windowed_sinc(cutoff, taps)
        });
        let fir = FirStream::new(anti_alias.clone().unwrap_or_else(|| vec![1.0]), ratio);
        #[cfg(feature = "high-quality-audio")]
        let sinc = match SincStream::new(ratio) {
            Ok(sinc) => Some(sinc),
            Err(err) => {
                log_sinc_fallback(&err, from_rate, to_rate);
                None
            }
        };
        Ok(Self {
            from_rate,
            to_rate,
            ratio,
            anti_alias,
            #[cfg(feature = "high-quality-audio")]
            sinc,
            fir,
        })
    }

    pub(crate) fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Convert one self-contained block; output length is `len * ratio`
    /// rounded.
    pub(crate) fn convert(&self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() || self.is_passthrough() {
            return input.to_vec();
        }
        let target = (input.len() as f64 * self.ratio).round() as usize;

        #[cfg(feature = "high-quality-audio")]
        {
            match SincStream::new(self.ratio).and_then(|sinc| sinc.finish(input)) {
                Ok(output) => return fit_length(output, target),
                Err(err) => log_sinc_fallback(&err, self.from_rate, self.to_rate),
            }
        }

        fit_length(self.fir_convert(input), target)
    }

    /// Convert the next chunk of a continuous stream. Samples the filter
    /// still needs are held back for the following call, so output length
    /// varies per chunk while the stream as a whole keeps the rate ratio.
    pub(crate) fn convert_chunk(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }

        #[cfg(feature = "high-quality-audio")]
        {
            if let Some(sinc) = self.sinc.as_mut() {
                match sinc.process(input) {
                    Ok(output) => return output,
                    Err(err) => {
                        log_sinc_fallback(&err, self.from_rate, self.to_rate);
                        self.sinc = None;
                    }
                }
            }
        }

        self.fir.process(input)
    }

    pub(super) fn fir_convert(&self, input: &[f32]) -> Vec<f32> {
        match &self.anti_alias {
            Some(taps) => interpolate_linear(&convolve_centered(input, taps), self.ratio as f32),
            None => interpolate_linear(input, self.ratio as f32),
        }
    }
}

/// Streaming form of the FIR path: causal filtering with carried history,
/// then linear interpolation at absolute stream positions shifted by the
/// filter delay. Output does not depend on how the input is chunked.
pub(super) struct FirStream {
    taps: Vec<f32>,
    step: f64,
    delay: f64,
    // Last `taps.len() - 1` input samples, oldest first.
    history: Vec<f32>,
    // Filtered samples from stream index `base` on.
    filtered: Vec<f32>,
    base: u64,
    produced: u64,
}

impl FirStream {
    /// `taps` must be non-empty; `[1.0]` passes samples straight through.
    pub(super) fn new(taps: Vec<f32>, ratio: f64) -> Self {
        Self {
            step: 1.0 / ratio,
            delay: (taps.len() / 2) as f64,
            history: vec![0.0; taps.len() - 1],
            taps,
            filtered: Vec::new(),
            base: 0,
            produced: 0,
        }
    }

    pub(super) fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let keep = self.history.len();
        self.history.extend_from_slice(input);
        for n in keep..self.history.len() {
            let window = &self.history[n - keep..=n];
            let sample: f32 = self
                .taps
                .iter()
                .zip(window.iter().rev())
                .map(|(coeff, x)| coeff * x)
                .sum();
            self.filtered.push(sample);
        }
        self.history.drain(..input.len());

        let available = self.base + self.filtered.len() as u64;
        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        loop {
            let position = self.produced as f64 * self.step + self.delay;
            let index = position.floor() as u64;
            if index + 1 >= available {
                break;
            }
            let frac = (position - index as f64) as f32;
            let a = self.filtered[(index - self.base) as usize];
            let b = self.filtered[(index + 1 - self.base) as usize];
            output.push(a * (1.0 - frac) + b * frac);
            self.produced += 1;
        }

        let next = (self.produced as f64 * self.step + self.delay).floor() as u64;
        let passed = next.saturating_sub(self.base).min(self.filtered.len() as u64) as usize;
        self.filtered.drain(..passed);
        self.base += passed as u64;
        output
    }
}

/// One-shot conversion. Unsupported rate pairs return the input unchanged.
pub(crate) fn resample_to_rate(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == to_rate {
        return input.to_vec();
    }
    match RateConverter::new(from_rate, to_rate) {
        Ok(converter) => converter.convert(input),
        Err(err) => {
            tracing::debug!(error = %err, "resampling skipped");
            input.to_vec()
        }
    }
}

fn check_rates(from_rate: u32, to_rate: u32) -> Result<f64> {
    if let Some(rate) = [from_rate, to_rate]
        .into_iter()
        .find(|rate| !(MIN_RATE..=MAX_RATE).contains(rate))
    {
        return Err(anyhow!("unsupported sample rate {rate}Hz for resampling"));
    }
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    if !(MIN_RESAMPLE_RATIO..=MAX_RESAMPLE_RATIO).contains(&ratio) {
        return Err(anyhow!("resample ratio {ratio} out of range"));
    }
    Ok(ratio)
}

/// rubato sinc resampler fed in fixed blocks; a partial block waits in
/// `staged` for the next call.
#[cfg(feature = "high-quality-audio")]
struct SincStream {
    resampler: SincFixedIn<f32>,
    staged: Vec<f32>,
}

#[cfg(feature = "high-quality-audio")]
impl SincStream {
    fn new(ratio: f64) -> Result<Self> {
        let params = InterpolationParameters {
            sinc_len: 64,
            f_cutoff: 0.90,
            interpolation: InterpolationType::Cubic,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, SINC_CHUNK, 1)
            .map_err(|e| anyhow!("failed to construct sinc resampler: {e:?}"))?;
        Ok(Self {
            resampler,
            staged: Vec::with_capacity(SINC_CHUNK * 2),
        })
    }

    fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.staged.extend_from_slice(input);
        let ready = self.staged.len() - self.staged.len() % SINC_CHUNK;
        let mut output = Vec::with_capacity(self.resampler.output_frames_next() * (ready / SINC_CHUNK));
        for block in self.staged[..ready].chunks_exact(SINC_CHUNK) {
            let produced = self
                .resampler
                .process(std::slice::from_ref(&block), None)
                .map_err(|e| anyhow!("sinc resampler failed: {e:?}"))?;
            if let Some(channel) = produced.first() {
                output.extend_from_slice(channel);
            }
        }
        self.staged.drain(..ready);
        Ok(output)
    }

    /// Process `input` and flush the last short block, held at its final
    /// sample.
    fn finish(mut self, input: &[f32]) -> Result<Vec<f32>> {
        let mut output = self.process(input)?;
        if let Some(&hold) = self.staged.last() {
            self.staged.resize(SINC_CHUNK, hold);
            output.extend(self.process(&[])?);
        }
        Ok(output)
    }
}

#[cfg(feature = "high-quality-audio")]
fn log_sinc_fallback(err: &anyhow::Error, from_rate: u32, to_rate: u32) {
    if !SINC_FALLBACK_LOGGED.swap(true, Ordering::AcqRel) {
        tracing::warn!(
            error = %err,
            from = from_rate,
            to = to_rate,
            "sinc resampler failed; using FIR path"
        );
    }
}

/// `ratio` > 1 upsamples.
pub(super) fn interpolate_linear(input: &[f32], ratio: f32) -> Vec<f32> {
    let out_len = (input.len() as f32 * ratio).round() as usize;
    let last = input.last().copied().unwrap_or(0.0);
    (0..out_len)
        .map(|i| {
            let position = i as f32 / ratio;
            let index = position.floor() as usize;
            let frac = position - index as f32;
            match (input.get(index), input.get(index + 1)) {
                (Some(a), Some(b)) => a * (1.0 - frac) + b * frac,
                _ => last,
            }
        })
        .collect()
}

/// Odd tap count growing with the decimation factor, 11..=129.
pub(super) fn anti_alias_tap_count(from_rate: u32, to_rate: u32) -> usize {
    let factor = from_rate as f32 / to_rate.max(1) as f32;
    let taps = ((factor * 4.0).ceil() as usize).max(11) | 1;
    taps.min(MAX_ANTI_ALIAS_TAPS)
}

/// Hamming-windowed sinc low-pass, normalized to unit DC gain.
pub(super) fn windowed_sinc(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    if taps <= 1 {
        return vec![1.0];
    }
    let span = (taps - 1) as f32;
    let mut coeffs: Vec<f32> = (0..taps)
        .map(|n| {
            let offset = n as f32 - span / 2.0;
            let ideal = if offset == 0.0 {
                2.0 * normalized_cutoff
            } else {
                (2.0 * PI * normalized_cutoff * offset).sin() / (PI * offset)
            };
            let hamming = 0.54 - 0.46 * (2.0 * PI * n as f32 / span).cos();
            ideal * hamming
        })
        .collect();

    let gain: f32 = coeffs.iter().sum();
    if gain != 0.0 {
        coeffs.iter_mut().for_each(|c| *c /= gain);
    }
    coeffs
}

/// Zero-padded convolution aligned on the filter center, same length as input.
pub(super) fn convolve_centered(input: &[f32], taps: &[f32]) -> Vec<f32> {
    let half = taps.len() / 2;
    (0..input.len())
        .map(|n| {
            taps.iter()
                .enumerate()
                .filter_map(|(k, coeff)| {
                    (n + k)
                        .checked_sub(half)
                        .and_then(|idx| input.get(idx))
                        .map(|sample| sample * coeff)
                })
                .sum()
        })
        .collect()
}

/// Truncate, or pad by holding the last sample.
pub(super) fn fit_length(mut data: Vec<f32>, len: usize) -> Vec<f32> {
    let hold = data.last().copied().unwrap_or(0.0);
    data.resize(len, hold);
    data
}
