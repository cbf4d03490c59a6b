#![allow(dead_code)]

use rand::{rngs::StdRng, Rng, SeedableRng};
use unmix_core::{ModelConfig, NetConfig, ParamSet};

/// 8 kHz, 64-point frames, 2 kHz bandwidth: `max_bin = 17` of 33 bins.
pub fn small_config(nb_channels: usize) -> ModelConfig {
    ModelConfig::new(8000, 64, 16, nb_channels, 8, 2000.0).unwrap()
}

/// Seeded uniform weights in `[-scale, scale)`; normalisation statistics are
/// kept in a sane range so the network stays finite.
pub fn random_params(config: &NetConfig, seed: u64, scale: f32) -> ParamSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut params = ParamSet::new();
    for (name, shape) in config.parameter_shapes() {
        let len: usize = shape.iter().product();
        let data = (0..len)
            .map(|_| {
                let v: f32 = rng.gen_range(-scale..scale);
                if name.ends_with("running_var") || name == "input_scale" {
                    1.0 + v.abs()
                } else {
                    v
                }
            })
            .collect();
        params.insert(name, shape, data).unwrap();
    }
    params
}

/// Weights whose mask is exactly 1 on every kept bin (and 0 beyond `max_bin`
/// once padded): all layers zero, output affine `0 * x + 1`.
pub fn passthrough_params(config: &NetConfig) -> ParamSet {
    let mut params = ParamSet::new();
    for (name, shape) in config.parameter_shapes() {
        let len: usize = shape.iter().product();
        let fill = if name.ends_with("running_var") || name == "output_mean" {
            1.0
        } else {
            0.0
        };
        params.insert(name, shape, vec![fill; len]).unwrap();
    }
    params
}

pub fn sine(freq: f32, rate: f32, len: usize, amp: f32) -> Vec<f32> {
    (0..len)
        .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin())
        .collect()
}
