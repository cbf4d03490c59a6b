mod common;

use std::{sync::Arc, thread};

use approx::assert_abs_diff_eq;
use ndarray::{s, Array3, Array4};
use unmix_core::{
    pad_mask, resolve_preset, ModelConfig, NetConfig, ParamSet, Separator, StftConfig, UnmixError,
    UnmixNet,
};

use common::{passthrough_params, random_params, sine, small_config};

fn noisy_mixture(channels: usize, len: usize) -> Array3<f32> {
    Array3::from_shape_fn((1, channels, len), |(_, c, i)| {
        let t = i as f32;
        0.4 * (t * 0.05 * (c + 1) as f32).sin() + 0.2 * (t * 1.3).cos()
    })
}

#[test]
fn preset_configs_derive_max_bin() {
    let hq = resolve_preset("umxhq").unwrap().model_config().unwrap();
    assert_eq!(hq.net.max_bin, 1487);
    assert_eq!(hq.net.nb_bins, 2049);
    assert_eq!(hq.net.nb_channels, 2);
    assert!(hq.stft.center);

    let se = resolve_preset("umxse").unwrap().model_config().unwrap();
    assert_eq!(se.net.max_bin, 513);
    assert_eq!(se.net.nb_bins, 513);
    assert_eq!(se.net.hidden_size, 256);
}

#[test]
fn mask_is_non_negative_and_bandwidth_limited() {
    let config = small_config(2);
    let params = random_params(&config.net, 7, 1.5);
    let sep = Separator::new(config, &params).unwrap();

    let audio = noisy_mixture(2, 500);
    let mask = sep.predict_mask(audio.view()).unwrap();
    assert_eq!(mask.dim(), (1, 2, 17, 500usize.div_ceil(16) + 1));
    assert!(mask.iter().all(|&m| m >= 0.0));
    // rectified, not clamped: strong random weights push some entries to exactly 0
    assert!(mask.iter().any(|&m| m == 0.0));
}

#[test]
fn same_preset_and_params_give_identical_masks() {
    let config = small_config(1);
    let params = random_params(&config.net, 11, 0.5);
    let a = Separator::new(config, &params).unwrap();
    let b = Separator::new(config, &params).unwrap();

    let audio = noisy_mixture(1, 777);
    assert_eq!(
        a.predict_mask(audio.view()).unwrap(),
        b.predict_mask(audio.view()).unwrap()
    );
}

#[test]
fn batch_items_are_independent() {
    let config = small_config(2);
    let params = random_params(&config.net, 3, 0.5);
    let sep = Separator::new(config, &params).unwrap();

    let one = noisy_mixture(2, 400);
    let mut two = Array3::<f32>::zeros((2, 2, 400));
    two.slice_mut(s![0, .., ..]).assign(&one.slice(s![0, .., ..]));
    two.slice_mut(s![1, .., ..]).fill(0.25);

    let alone = sep.separate(one.view()).unwrap();
    let batched = sep.separate(two.view()).unwrap();
    assert_eq!(batched.dim(), (2, 2, 400));
    for (a, b) in alone.iter().zip(batched.slice(s![0, .., ..]).iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn unit_mask_keeps_low_band_and_removes_bins_above_max_bin() {
    let config = small_config(1);
    let sep = Separator::new(config, &passthrough_params(&config.net)).unwrap();

    let len = 2000;
    let low = sine(200.0, 8000.0, len, 0.5);
    let high = sine(3500.0, 8000.0, len, 0.5);
    let mix: Vec<f32> = low.iter().zip(&high).map(|(a, b)| a + b).collect();
    let audio = Array3::from_shape_vec((1, 1, len), mix).unwrap();

    let out = sep.separate(audio.view()).unwrap();
    assert_eq!(out.dim(), (1, 1, len));
    // frames that overlap the reflect-padded edges smear the high tone downwards
    for i in 64..len - 96 {
        let (y, want) = (out[[0, 0, i]], low[i]);
        assert!((y - want).abs() < 1e-2, "sample {i}: {y} vs {want}");
    }
}

#[test]
fn silent_stereo_mixture_through_music_preset_stays_silent() {
    let config = resolve_preset("umxhq").unwrap().model_config().unwrap();
    let params = random_params(&config.net, 42, 0.05);
    let sep = Separator::new(config, &params).unwrap();

    let audio = Array3::<f32>::zeros((1, 2, 4 * 44100));
    let out = sep.separate(audio.view()).unwrap();
    assert_eq!(out.dim(), (1, 2, 4 * 44100));
    assert!(out.iter().all(|v| v.abs() < 1e-6));
}

#[test]
fn malformed_inputs_are_rejected() {
    let config = small_config(2);
    let sep = Separator::new(config, &passthrough_params(&config.net)).unwrap();

    let mono = Array3::<f32>::zeros((1, 1, 100));
    let empty = Array3::<f32>::zeros((1, 2, 0));
    let no_batch = Array3::<f32>::zeros((0, 2, 100));
    let mut nan = Array3::<f32>::zeros((1, 2, 100));
    nan[[0, 1, 5]] = f32::NAN;

    for audio in [mono, empty, no_batch, nan] {
        match sep.separate(audio.view()) {
            Err(UnmixError::InvalidInput(_)) => {}
            other => panic!("expected InvalidInput, got {:?}", other.map(|a| a.dim())),
        }
    }
}

#[test]
fn parameter_problems_fail_at_construction() {
    let config = small_config(1);
    let good = passthrough_params(&config.net);

    // wrong shape
    let mut wrong = ParamSet::new();
    for name in good.names() {
        let t = good.get(name).unwrap();
        let shape = if name == "fc1.weight" {
            vec![t.shape[0], t.shape[1] + 1]
        } else {
            t.shape.clone()
        };
        let len = shape.iter().product();
        wrong.insert(name, shape, vec![0.0; len]).unwrap();
    }
    assert!(matches!(
        Separator::new(config, &wrong),
        Err(UnmixError::ShapeMismatch { name, .. }) if name == "fc1.weight"
    ));

    // missing tensor
    let mut missing = ParamSet::new();
    for name in good.names().filter(|n| *n != "bn2.running_var") {
        let t = good.get(name).unwrap();
        missing.insert(name, t.shape.clone(), t.data.clone()).unwrap();
    }
    assert!(matches!(
        Separator::new(config, &missing),
        Err(UnmixError::MissingParameter(name)) if name == "bn2.running_var"
    ));

    // unexpected tensor
    let mut extra = good.clone();
    extra.insert("fc4.weight", vec![1], vec![0.0]).unwrap();
    assert!(matches!(
        Separator::new(config, &extra),
        Err(UnmixError::UnexpectedParameter(name)) if name == "fc4.weight"
    ));
}

#[test]
fn config_invariants_are_checked_up_front() {
    let mut config = small_config(1);
    config.net.max_bin = config.net.nb_bins + 1;
    let params = ParamSet::new();
    assert!(matches!(
        Separator::new(config, &params),
        Err(UnmixError::InvalidConfig(_))
    ));

    let mut uncentered = small_config(1);
    uncentered.stft = StftConfig {
        center: false,
        ..uncentered.stft
    };
    assert!(matches!(
        Separator::new(uncentered, &params),
        Err(UnmixError::InvalidConfig(_))
    ));

    let bad_net = NetConfig {
        max_bin: 0,
        ..small_config(1).net
    };
    assert!(UnmixNet::new(bad_net, &params).is_err());
    assert!(ModelConfig::new(8000, 64, 64, 1, 8, 2000.0).is_err());
    assert!(ModelConfig::new(8000, 64, 16, 1, 7, 2000.0).is_err());
}

#[test]
fn mask_padding_zeroes_bins_above_max_bin() {
    let mask = Array4::<f32>::ones((1, 2, 3, 4));
    let full = pad_mask(mask.view(), 5).unwrap();
    assert_eq!(full.dim(), (1, 2, 5, 4));
    assert!(full.slice(s![.., .., ..3, ..]).iter().all(|&v| v == 1.0));
    assert!(full.slice(s![.., .., 3.., ..]).iter().all(|&v| v == 0.0));
    assert!(pad_mask(mask.view(), 2).is_err());
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn separator_is_shareable_across_threads() {
    assert_send_sync::<Separator>();

    let config = small_config(2);
    let params = random_params(&config.net, 11, 0.8);
    let sep = Arc::new(Separator::new(config, &params).unwrap());
    let audio = noisy_mixture(2, 700);
    let expected = sep.separate(audio.view()).unwrap();

    let outputs: Vec<Array3<f32>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sep = Arc::clone(&sep);
                let audio = &audio;
                scope.spawn(move || sep.separate(audio.view()).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for out in outputs {
        assert_eq!(out, expected);
    }
}
