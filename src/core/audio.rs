use std::{fs::File, path::Path};

use anyhow::{anyhow, Context};
use hound::{SampleFormat, WavSpec, WavWriter};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tracing::{info, warn};

use crate::{
    error::{Result, UnmixError},
    types::AudioData,
};

fn open_format(path: &Path) -> Result<Box<dyn FormatReader>> {
    let file = File::open(path).with_context(|| format!("Failed to open audio file: {path:?}"))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| anyhow!("Unsupported audio file {path:?}: {e}"))?;
    Ok(probed.format)
}

/// Decode the default track of any supported container into interleaved f32.
///
/// Corrupt packets are skipped with a warning; the stream ends at EOF.
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    let path = path.as_ref();
    let mut format = open_format(path)?;

    let track = format.default_track().context("No default track found")?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map_or(0, |c| c.count() as u16);

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("Unsupported codec in {path:?}: {e}"))?;

    let mut samples = Vec::new();
    let mut skipped = 0usize;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(anyhow!("Failed to read packet: {e}").into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                skipped += 1;
                warn!(path = %path.display(), error = e, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(anyhow!("Failed to decode packet: {e}").into()),
        };
        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    info!(
        path = %path.display(),
        sample_rate,
        channels,
        samples = samples.len(),
        skipped,
        "read audio"
    );

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
    })
}

/// Sample count as the WAV writer takes it; larger buffers do not fit a WAV file.
fn pcm_len(samples: usize) -> Result<u32> {
    u32::try_from(samples).map_err(|_| {
        UnmixError::InvalidInput(format!("{samples} samples exceed the WAV size limit"))
    })
}

/// Write interleaved samples as 16-bit PCM WAV, clipping to `[-1, 1]`.
pub fn write_audio<P: AsRef<Path>>(path: P, audio: &AudioData) -> Result<()> {
    let spec = WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let len = pcm_len(audio.samples.len())?;
    let mut writer = WavWriter::create(path.as_ref(), spec).map_err(anyhow::Error::from)?;
    {
        let mut pcm = writer.get_i16_writer(len);
        for &s in &audio.samples {
            pcm.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
        }
        pcm.flush().map_err(anyhow::Error::from)?;
    }
    writer.finalize().map_err(anyhow::Error::from)?;
    Ok(())
}
