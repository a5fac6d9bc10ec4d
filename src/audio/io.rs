//! WAV reading and writing.

use anyhow::Result;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;

/// Read a WAV file into per-channel f32 samples in `[-1, 1]`.
///
/// Returns the channel vectors and the source sample rate. Integer formats are
/// rescaled by their bit depth; float formats pass through.
///
/// # Errors
///
/// Fails on unreadable files and on files that contain no samples.
pub fn read_wav(path: impl AsRef<Path>) -> Result<(Vec<Vec<f32>>, u32)> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    let mut samples = vec![Vec::new(); channels];

    match spec.sample_format {
        SampleFormat::Float => {
            for (idx, sample) in reader.samples::<f32>().enumerate() {
                samples[idx % channels].push(sample?);
            }
        }
        SampleFormat::Int => {
            let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            for (idx, sample) in reader.samples::<i32>().enumerate() {
                samples[idx % channels].push(sample? as f32 / max);
            }
        }
    }

    if samples.iter().all(|channel| channel.is_empty()) {
        anyhow::bail!("{} contains no samples", path.display());
    }

    Ok((samples, spec.sample_rate))
}

/// Write a mono waveform as 16-bit PCM.
///
/// Values are clamped to `[-1, 1]` before quantization.
pub fn write_wav(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        anyhow::bail!("refusing to write an empty waveform");
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for value in samples {
        let scaled = (value.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(scaled)?;
    }
    writer.finalize()?;
    Ok(())
}
