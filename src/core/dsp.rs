use crate::error::{Result, UnmixError};
use ndarray::{s, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Zip};
use num_complex::Complex32;
use rayon::prelude::*;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Framing parameters of the spectral transform.
///
/// `center` has no default: callers state it. The separator only runs with
/// `center = true`, which is what makes `istft(stft(x))` length-exact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StftConfig {
    pub n_fft: usize,
    pub n_hop: usize,
    pub center: bool,
}

impl StftConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_fft < 2 {
            return Err(UnmixError::InvalidConfig(format!(
                "n_fft must be at least 2, got {}",
                self.n_fft
            )));
        }
        if self.n_hop == 0 || self.n_hop >= self.n_fft {
            return Err(UnmixError::InvalidConfig(format!(
                "n_hop must satisfy 0 < n_hop < n_fft, got n_hop={} n_fft={}",
                self.n_hop, self.n_fft
            )));
        }
        Ok(())
    }

    /// Bins kept from each frame (real-input symmetry).
    pub fn nb_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn nb_frames(&self, len: usize) -> usize {
        if self.center {
            len.div_ceil(self.n_hop) + 1
        } else if len <= self.n_fft {
            1
        } else {
            (len - self.n_fft).div_ceil(self.n_hop) + 1
        }
    }

    fn pad(&self) -> usize {
        if self.center {
            self.n_fft / 2
        } else {
            0
        }
    }
}

/// Periodic Hann window (`torch.hann_window(n, periodic=True)`).
pub fn hann_window(n_fft: usize) -> Vec<f32> {
    (0..n_fft)
        .map(|i| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / n_fft as f64;
            (0.5 - 0.5 * phase.cos()) as f32
        })
        .collect()
}

/// Index into a signal of length `len` under reflect padding (edge sample not repeated).
fn reflect_index(j: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut m = j.rem_euclid(period);
    if m >= len as isize {
        m = period - m;
    }
    m as usize
}

/// Forward/inverse short-time Fourier transform with cached plans and window.
pub struct Stft {
    config: StftConfig,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl Stft {
    pub fn new(config: StftConfig) -> Result<Self> {
        config.validate()?;
        let mut planner = FftPlanner::new();
        Ok(Self {
            config,
            fft_forward: planner.plan_fft_forward(config.n_fft),
            fft_inverse: planner.plan_fft_inverse(config.n_fft),
            window: hann_window(config.n_fft),
        })
    }

    pub fn config(&self) -> &StftConfig {
        &self.config
    }

    /// Signal laid out for framing: reflect pad on both sides when centered,
    /// zeros after that until the last frame fits.
    fn padded(&self, x: &[f32], frames: usize) -> Vec<f32> {
        let n_fft = self.config.n_fft;
        let pad = self.config.pad();
        let total = (frames - 1) * self.config.n_hop + n_fft;
        let mut out = vec![0.0f32; total];

        if self.config.center {
            let reflected = (x.len() + 2 * pad).min(total);
            for (i, v) in out[..reflected].iter_mut().enumerate() {
                *v = x[reflect_index(i as isize - pad as isize, x.len())];
            }
        } else {
            let n = x.len().min(total);
            out[..n].copy_from_slice(&x[..n]);
        }
        out
    }

    /// Transform one signal into a `(bin, frame)` complex spectrogram.
    pub fn forward_signal(&self, x: &[f32]) -> Result<Array2<Complex32>> {
        if x.is_empty() {
            return Err(UnmixError::InvalidInput("cannot transform an empty signal".into()));
        }
        let n_fft = self.config.n_fft;
        let hop = self.config.n_hop;
        let nb_bins = self.config.nb_bins();
        let frames = self.config.nb_frames(x.len());
        let signal = self.padded(x, frames);

        let mut out = Array2::<Complex32>::zeros((nb_bins, frames));
        let mut buf = vec![Complex32::zero(); n_fft];

        for fr in 0..frames {
            let frame = &signal[fr * hop..fr * hop + n_fft];
            for ((b, &v), &w) in buf.iter_mut().zip(frame).zip(&self.window) {
                *b = Complex32::new(v * w, 0.0);
            }

            self.fft_forward.process(&mut buf);

            for fi in 0..nb_bins {
                out[[fi, fr]] = buf[fi];
            }
        }

        Ok(out)
    }

    /// Invert a `(bin, frame)` spectrogram back to a signal of exactly `length` samples.
    pub fn inverse_signal(&self, spec: ArrayView2<Complex32>, length: usize) -> Result<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.n_hop;
        let nb_bins = self.config.nb_bins();
        let (bins, frames) = spec.dim();
        if bins != nb_bins {
            return Err(UnmixError::InvalidInput(format!(
                "spectrogram has {bins} bins, transform expects {nb_bins}"
            )));
        }
        if frames == 0 {
            return Err(UnmixError::InvalidInput("spectrogram has no frames".into()));
        }

        let total = (frames - 1) * hop + n_fft;
        let mut out = vec![0.0f32; total];
        let mut window_sum = vec![0.0f32; total];
        let mut buf = vec![Complex32::zero(); n_fft];
        let scale = 1.0 / n_fft as f32;

        for fr in 0..frames {
            for fi in 0..nb_bins {
                buf[fi] = spec[[fi, fr]];
            }
            // Hermitian completion of the negative frequencies
            for fi in nb_bins..n_fft {
                buf[fi] = buf[n_fft - fi].conj();
            }
            buf[0].im = 0.0;
            if n_fft % 2 == 0 {
                buf[n_fft / 2].im = 0.0;
            }

            self.fft_inverse.process(&mut buf);

            let start = fr * hop;
            for (i, (&w, b)) in self.window.iter().zip(&buf).enumerate() {
                out[start + i] += b.re * scale * w;
                window_sum[start + i] += w * w;
            }
        }

        for (v, &sum) in out.iter_mut().zip(&window_sum) {
            if sum > 1e-10 {
                *v /= sum;
            }
        }

        let pad = self.config.pad();
        let mut signal = vec![0.0f32; length];
        let available = total.saturating_sub(pad).min(length);
        signal[..available].copy_from_slice(&out[pad..pad + available]);
        Ok(signal)
    }

    /// Batched forward transform: `(batch, channel, samples)` to `(batch, channel, bin, frame)`.
    pub fn forward(&self, audio: ArrayView3<f32>) -> Result<Array4<Complex32>> {
        let (batch, channels, samples) = audio.dim();
        let frames = self.config.nb_frames(samples);

        let specs = (0..batch * channels)
            .into_par_iter()
            .map(|idx| {
                let row = audio.slice(s![idx / channels, idx % channels, ..]).to_vec();
                self.forward_signal(&row)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = Array4::<Complex32>::zeros((batch, channels, self.config.nb_bins(), frames));
        for (idx, spec) in specs.into_iter().enumerate() {
            out.slice_mut(s![idx / channels, idx % channels, .., ..])
                .assign(&spec);
        }
        Ok(out)
    }

    /// Batched inverse transform to `(batch, channel, length)`.
    pub fn inverse(&self, spec: ArrayView4<Complex32>, length: usize) -> Result<Array3<f32>> {
        let (batch, channels, _, _) = spec.dim();

        let signals = (0..batch * channels)
            .into_par_iter()
            .map(|idx| {
                self.inverse_signal(spec.slice(s![idx / channels, idx % channels, .., ..]), length)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = Array3::<f32>::zeros((batch, channels, length));
        for (idx, signal) in signals.into_iter().enumerate() {
            out.slice_mut(s![idx / channels, idx % channels, ..])
                .iter_mut()
                .zip(signal)
                .for_each(|(o, v)| *o = v);
        }
        Ok(out)
    }
}

/// Split a complex spectrogram into magnitude and phase.
pub fn magphase(spec: ArrayView4<Complex32>) -> (Array4<f32>, Array4<f32>) {
    (spec.mapv(|z| z.norm()), spec.mapv(|z| z.arg()))
}

/// Recombine magnitude and phase into a complex spectrogram.
pub fn polar(magnitude: ArrayView4<f32>, phase: ArrayView4<f32>) -> Array4<Complex32> {
    Zip::from(&magnitude)
        .and(&phase)
        .map_collect(|&m, &p| Complex32::from_polar(m, p))
}

/// Interleaved frames to a `(channel, samples)` array.
pub fn to_planar(interleaved: &[f32], channels: u16) -> Result<Array2<f32>> {
    if channels == 0 {
        return Err(UnmixError::InvalidInput("audio has zero channels".into()));
    }
    let channels = channels as usize;
    if interleaved.len() % channels != 0 {
        return Err(UnmixError::InvalidInput(format!(
            "{} interleaved samples do not divide into {channels} channels",
            interleaved.len()
        )));
    }
    let samples = interleaved.len() / channels;
    let planar = Array2::from_shape_vec((samples, channels), interleaved.to_vec())?;
    Ok(planar.reversed_axes().as_standard_layout().to_owned())
}

pub fn to_interleaved(planar: ArrayView2<f32>) -> Vec<f32> {
    planar.t().iter().copied().collect()
}

/// Adapt a `(channel, samples)` array to `target` channels: mono is duplicated,
/// multichannel is averaged down to mono.
pub fn match_channels(planar: Array2<f32>, target: usize) -> Result<Array2<f32>> {
    let (channels, samples) = planar.dim();
    if channels == target {
        return Ok(planar);
    }
    match (channels, target) {
        (1, t) => Ok(planar
            .broadcast((t, samples))
            .ok_or_else(|| UnmixError::InvalidInput("cannot broadcast mono signal".into()))?
            .to_owned()),
        (_, 1) => Ok(planar.mean_axis(ndarray::Axis(0)).map_or_else(
            || Array2::zeros((1, samples)),
            |m| m.insert_axis(ndarray::Axis(0)),
        )),
        _ => Err(UnmixError::InvalidInput(format!(
            "cannot adapt {channels} channels to {target}"
        ))),
    }
}
