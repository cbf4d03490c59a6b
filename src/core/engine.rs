use crate::{
    core::{
        bandwidth::bandwidth_to_max_bin,
        dsp::{magphase, polar, Stft, StftConfig},
        network::{NetConfig, UnmixNet},
    },
    error::{Result, UnmixError},
    model::weights::ParamSet,
};

use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Recurrent layers in every shipped configuration.
pub const NB_LAYERS: usize = 3;

/// Everything needed to instantiate a separator, minus the weights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub sample_rate: u32,
    pub stft: StftConfig,
    pub net: NetConfig,
}

impl ModelConfig {
    /// Derives `max_bin` from `bandwidth` once, here; it never changes afterwards.
    pub fn new(
        sample_rate: u32,
        n_fft: usize,
        n_hop: usize,
        nb_channels: usize,
        hidden_size: usize,
        bandwidth: f64,
    ) -> Result<Self> {
        let stft = StftConfig {
            n_fft,
            n_hop,
            center: true,
        };
        let max_bin = bandwidth_to_max_bin(sample_rate as f64, n_fft, bandwidth)?;
        let config = Self {
            sample_rate,
            stft,
            net: NetConfig {
                nb_channels,
                hidden_size,
                max_bin,
                nb_bins: stft.nb_bins(),
                nb_layers: NB_LAYERS,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(UnmixError::InvalidConfig("sample rate must be positive".into()));
        }
        self.stft.validate()?;
        if !self.stft.center {
            return Err(UnmixError::InvalidConfig(
                "separation requires a centered STFT".into(),
            ));
        }
        if self.net.nb_bins != self.stft.nb_bins() {
            return Err(UnmixError::InvalidConfig(format!(
                "network bin count {} does not match n_fft/2+1 = {}",
                self.net.nb_bins,
                self.stft.nb_bins()
            )));
        }
        self.net.validate()
    }
}

/// Zero-pad a `(batch, channel, max_bin, frame)` mask up to `nb_bins` bins.
pub fn pad_mask(mask: ArrayView4<f32>, nb_bins: usize) -> Result<Array4<f32>> {
    let (batch, ch, bins, frames) = mask.dim();
    if bins > nb_bins {
        return Err(UnmixError::InvalidInput(format!(
            "mask has {bins} bins, more than the {nb_bins} available"
        )));
    }
    let mut full = Array4::<f32>::zeros((batch, ch, nb_bins, frames));
    full.slice_mut(s![.., .., ..bins, ..]).assign(&mask);
    Ok(full)
}

/// STFT front-end, masking network and resynthesis for one target.
///
/// Read-only after construction; share it across threads behind an `Arc`.
pub struct Separator {
    config: ModelConfig,
    stft: Stft,
    net: UnmixNet,
}

impl Separator {
    pub fn new(config: ModelConfig, params: &ParamSet) -> Result<Self> {
        config.validate()?;
        let stft = Stft::new(config.stft)?;
        let net = UnmixNet::new(config.net, params)?;
        info!(
            sample_rate = config.sample_rate,
            n_fft = config.stft.n_fft,
            n_hop = config.stft.n_hop,
            max_bin = config.net.max_bin,
            "separator ready"
        );
        Ok(Self { config, stft, net })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn check_input(&self, audio: &ArrayView3<f32>) -> Result<()> {
        let (batch, channels, samples) = audio.dim();
        if batch == 0 {
            return Err(UnmixError::InvalidInput("batch is empty".into()));
        }
        if channels != self.config.net.nb_channels {
            return Err(UnmixError::InvalidInput(format!(
                "expected {} channel(s), got {channels}",
                self.config.net.nb_channels
            )));
        }
        if samples == 0 {
            return Err(UnmixError::InvalidInput("waveform has zero length".into()));
        }
        if audio.iter().any(|v| !v.is_finite()) {
            return Err(UnmixError::InvalidInput("waveform contains non-finite samples".into()));
        }
        Ok(())
    }

    /// Magnitude, phase and the bandwidth-limited mask of a mixture.
    fn analyse(&self, audio: ArrayView3<f32>) -> Result<(Array4<f32>, Array4<f32>, Array4<f32>)> {
        self.check_input(&audio)?;
        let spec = self.stft.forward(audio)?;
        let (magnitude, phase) = magphase(spec.view());
        let truncated = magnitude.slice(s![.., .., ..self.config.net.max_bin, ..]);
        let mask = self.net.forward_batch(truncated)?;
        Ok((magnitude, phase, mask))
    }

    /// Mask over the first `max_bin` bins, `(batch, channel, max_bin, frame)`.
    pub fn predict_mask(&self, audio: ArrayView3<f32>) -> Result<Array4<f32>> {
        Ok(self.analyse(audio)?.2)
    }

    /// Estimate the target waveform; output shape equals input shape.
    pub fn separate(&self, audio: ArrayView3<f32>) -> Result<Array3<f32>> {
        let samples = audio.dim().2;
        let (magnitude, phase, mask) = self.analyse(audio)?;

        let full_mask = pad_mask(mask.view(), self.config.stft.nb_bins())?;
        let estimate = full_mask * &magnitude;
        debug!(shape = ?estimate.dim(), "resynthesising");

        let spec = polar(estimate.view(), phase.view());
        self.stft.inverse(spec.view(), samples)
    }
}
