use crate::{
    core::{
        audio::{read_audio, write_audio},
        dsp::{match_channels, to_interleaved, to_planar},
    },
    error::{Result, UnmixError},
    io::progress::{emit_split_progress, SplitProgress},
    model::{model_manager::load_separator, registry::resolve_preset},
    types::{AudioData, SplitOptions, SplitResult, StemOutput},
};

use ndarray::Axis;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Separate every requested target of `opts.preset` from the file at `input_path`
/// and write one `<file stem>_<target>.wav` per target into `opts.output_dir`.
pub fn split_file(input_path: &str, opts: SplitOptions) -> Result<SplitResult> {
    emit_split_progress(SplitProgress::Stage("resolve_model"));
    let preset = resolve_preset(&opts.preset)?;

    let mut targets: Vec<String> = if opts.targets.is_empty() {
        preset.targets.keys().cloned().collect()
    } else {
        opts.targets.clone()
    };
    // first mention wins; repeats would overwrite the same stem file
    let mut seen = HashSet::new();
    targets.retain(|t| seen.insert(t.clone()));
    // reject unknown targets before touching the network or the file
    for t in &targets {
        preset.content_id(t)?;
    }

    emit_split_progress(SplitProgress::Stage("read_audio"));
    let audio = read_audio(input_path)?;
    if audio.samples.is_empty() {
        return Err(UnmixError::InvalidInput(format!("{input_path} contains no samples")));
    }
    if audio.sample_rate != preset.sample_rate {
        return Err(UnmixError::InvalidInput(format!(
            "{input_path} is sampled at {} Hz, preset `{}` expects {} Hz",
            audio.sample_rate, preset.name, preset.sample_rate
        )));
    }

    let mut planar = to_planar(&audio.samples, audio.channels)?;
    if planar.nrows() != preset.nb_channels {
        warn!(
            from = planar.nrows(),
            to = preset.nb_channels,
            "adapting channel count to the model"
        );
        planar = match_channels(planar, preset.nb_channels)?;
    }
    let mixture = planar.insert_axis(Axis(0));

    fs::create_dir_all(&opts.output_dir)?;
    let file_stem = Path::new(input_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let base = PathBuf::from(&opts.output_dir).join(file_stem);

    let mut stems = Vec::with_capacity(targets.len());
    for (done, target) in targets.iter().enumerate() {
        emit_split_progress(SplitProgress::Target {
            name: target.clone(),
            done,
            total: targets.len(),
        });

        let separator = load_separator(&preset.name, target, &opts.weights)?;
        let estimate = separator.separate(mixture.view())?;
        let estimate = estimate.index_axis_move(Axis(0), 0);

        let path = PathBuf::from(format!("{}_{target}.wav", base.to_string_lossy()));
        write_audio(
            &path,
            &AudioData {
                samples: to_interleaved(estimate.view()),
                sample_rate: preset.sample_rate,
                channels: preset.nb_channels as u16,
            },
        )?;
        info!(target = %target, path = %path.display(), "stem written");

        stems.push(StemOutput {
            target: target.clone(),
            path,
        });
    }

    emit_split_progress(SplitProgress::Finished);

    Ok(SplitResult {
        preset: preset.name.clone(),
        stems,
    })
}
