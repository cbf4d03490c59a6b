use ndarray::{concatenate, Array1, Array2, Array3, Array4, ArrayView3, ArrayView4, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    core::layers::{Affine, BiLstm, Linear},
    error::{Result, UnmixError},
    model::weights::{ParamLoader, ParamSet},
};

/// Shape hyperparameters of the masking network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetConfig {
    pub nb_channels: usize,
    pub hidden_size: usize,
    /// Bins fed to (and predicted by) the network.
    pub max_bin: usize,
    /// Full bin count of the spectral transform, `n_fft / 2 + 1`.
    pub nb_bins: usize,
    pub nb_layers: usize,
}

impl NetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nb_channels == 0 {
            return Err(UnmixError::InvalidConfig("nb_channels must be positive".into()));
        }
        if self.hidden_size == 0 || self.hidden_size % 2 != 0 {
            return Err(UnmixError::InvalidConfig(format!(
                "hidden_size must be positive and even, got {}",
                self.hidden_size
            )));
        }
        if self.max_bin == 0 || self.max_bin > self.nb_bins {
            return Err(UnmixError::InvalidConfig(format!(
                "max_bin must satisfy 0 < max_bin <= {}, got {}",
                self.nb_bins, self.max_bin
            )));
        }
        if self.nb_layers == 0 {
            return Err(UnmixError::InvalidConfig("nb_layers must be positive".into()));
        }
        Ok(())
    }

    /// Every tensor the network reads, with its expected shape.
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let NetConfig {
            nb_channels: ch,
            hidden_size: hidden,
            max_bin,
            nb_layers,
            ..
        } = *self;
        let half = hidden / 2;
        let features = ch * max_bin;

        let mut shapes = vec![
            ("input_mean".to_string(), vec![max_bin]),
            ("input_scale".to_string(), vec![max_bin]),
            ("fc1.weight".to_string(), vec![hidden, features]),
        ];
        let batch_norm = |name: &str, dim: usize| {
            ["weight", "bias", "running_mean", "running_var"]
                .map(|p| (format!("{name}.{p}"), vec![dim]))
        };
        shapes.extend(batch_norm("bn1", hidden));
        for layer in 0..nb_layers {
            for dir in ["", "_reverse"] {
                shapes.push((format!("lstm.weight_ih_l{layer}{dir}"), vec![4 * half, hidden]));
                shapes.push((format!("lstm.weight_hh_l{layer}{dir}"), vec![4 * half, half]));
                shapes.push((format!("lstm.bias_ih_l{layer}{dir}"), vec![4 * half]));
                shapes.push((format!("lstm.bias_hh_l{layer}{dir}"), vec![4 * half]));
            }
        }
        shapes.push(("fc2.weight".to_string(), vec![hidden, 2 * hidden]));
        shapes.extend(batch_norm("bn2", hidden));
        shapes.push(("fc3.weight".to_string(), vec![features, hidden]));
        shapes.extend(batch_norm("bn3", features));
        shapes.push(("output_scale".to_string(), vec![max_bin]));
        shapes.push(("output_mean".to_string(), vec![max_bin]));
        shapes
    }
}

/// Bandwidth-limited BiLSTM mask estimator.
///
/// Input is a magnitude spectrogram truncated to `max_bin` bins, output a
/// rectified mask of the same shape. Nothing is carried between calls.
pub struct UnmixNet {
    config: NetConfig,
    input_mean: Array1<f32>,
    input_scale: Array1<f32>,
    fc1: Linear,
    bn1: Affine,
    lstm: BiLstm,
    fc2: Linear,
    bn2: Affine,
    fc3: Linear,
    bn3: Affine,
    output_scale: Array1<f32>,
    output_mean: Array1<f32>,
}

impl UnmixNet {
    pub fn new(config: NetConfig, params: &ParamSet) -> Result<Self> {
        config.validate()?;
        let NetConfig {
            nb_channels: ch,
            hidden_size: hidden,
            max_bin,
            nb_layers,
            ..
        } = config;
        let features = ch * max_bin;

        let mut p = ParamLoader::new(params);
        let net = Self {
            config,
            input_mean: p.vector("input_mean", max_bin)?,
            input_scale: p.vector("input_scale", max_bin)?,
            fc1: Linear::load(&mut p, "fc1", features, hidden, false)?,
            bn1: Affine::batch_norm(&mut p, "bn1", hidden)?,
            // half-width directions so the concatenation is `hidden` wide
            lstm: BiLstm::load(&mut p, "lstm", hidden, hidden / 2, nb_layers)?,
            fc2: Linear::load(&mut p, "fc2", 2 * hidden, hidden, false)?,
            bn2: Affine::batch_norm(&mut p, "bn2", hidden)?,
            fc3: Linear::load(&mut p, "fc3", hidden, features, false)?,
            bn3: Affine::batch_norm(&mut p, "bn3", features)?,
            output_scale: p.vector("output_scale", max_bin)?,
            output_mean: p.vector("output_mean", max_bin)?,
        };
        p.finish()?;
        Ok(net)
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Mask for one item: `(channel, max_bin, frame)` in and out.
    pub fn forward(&self, mag: ArrayView3<f32>) -> Result<Array3<f32>> {
        let (ch, bins, frames) = mag.dim();
        let max_bin = self.config.max_bin;
        if ch != self.config.nb_channels || bins != max_bin {
            return Err(UnmixError::InvalidInput(format!(
                "network expects ({}, {max_bin}, frames), got ({ch}, {bins}, {frames})",
                self.config.nb_channels
            )));
        }
        if frames == 0 {
            return Err(UnmixError::InvalidInput("spectrogram has no frames".into()));
        }

        // (frame, channel, bin), normalised per bin
        let mut x = mag.permuted_axes([2, 0, 1]).as_standard_layout().into_owned();
        x += &self.input_mean;
        x *= &self.input_scale;
        let x = x.into_shape((frames, ch * max_bin))?;

        let mut skip = self.fc1.forward(x.view());
        self.bn1.apply(&mut skip);
        skip.mapv_inplace(f32::tanh);

        let recurrent = self.lstm.forward(skip.view())?;
        let joined = concatenate(Axis(1), &[skip.view(), recurrent.view()])?;

        let mut y = self.fc2.forward(joined.view());
        self.bn2.apply(&mut y);
        y.mapv_inplace(|v| v.max(0.0));

        let mut y = self.fc3.forward(y.view());
        self.bn3.apply(&mut y);

        let mut y = to_frames(y, frames, ch, max_bin)?;
        y *= &self.output_scale;
        y += &self.output_mean;
        y.mapv_inplace(|v| v.max(0.0));

        Ok(y.permuted_axes([1, 2, 0]).as_standard_layout().into_owned())
    }

    /// Batched masks: `(batch, channel, max_bin, frame)`, items in parallel.
    pub fn forward_batch(&self, mag: ArrayView4<f32>) -> Result<Array4<f32>> {
        let (batch, ch, bins, frames) = mag.dim();
        debug!(batch, ch, bins, frames, "predicting masks");

        let masks = (0..batch)
            .into_par_iter()
            .map(|b| self.forward(mag.index_axis(Axis(0), b)))
            .collect::<Result<Vec<_>>>()?;

        let mut out = Array4::<f32>::zeros((batch, ch, bins, frames));
        for (mut slot, mask) in out.outer_iter_mut().zip(masks) {
            slot.assign(&mask);
        }
        Ok(out)
    }
}

fn to_frames(y: Array2<f32>, frames: usize, ch: usize, bins: usize) -> Result<Array3<f32>> {
    Ok(Array3::from_shape_vec((frames, ch, bins), y.iter().copied().collect())?)
}
