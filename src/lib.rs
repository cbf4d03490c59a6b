//! # unmix-core
//!
//! Spectrogram-masking source separation: a centered STFT front-end, a
//! bandwidth-limited BiLSTM mask estimator and resynthesis back to a waveform
//! of the same length, plus weight retrieval and a file-level split pipeline.

pub mod core;
pub mod error;
pub mod io;
pub mod model;
pub mod types;

pub use crate::{
    core::{
        audio::{read_audio, write_audio},
        bandwidth::bandwidth_to_max_bin,
        dsp::{magphase, polar, Stft, StftConfig},
        engine::{pad_mask, ModelConfig, Separator},
        network::{NetConfig, UnmixNet},
        splitter::split_file,
    },
    error::{Result, UnmixError},
    io::progress::{set_download_progress_callback, set_split_progress_callback, SplitProgress},
    model::{
        model_manager::{ensure_weights, load_separator, WeightsHandle, WeightsOptions},
        registry::{registry, resolve_preset, PresetEntry, TargetBlob},
        weights::ParamSet,
    },
    types::{AudioData, SplitOptions, SplitResult, StemOutput},
};
