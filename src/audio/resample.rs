//! Sample-rate conversion and channel mixdown.

use anyhow::Result;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Mix multi-channel audio down to mono by channel averaging.
pub fn mix_to_mono(channels: &[Vec<f32>]) -> Result<Vec<f32>> {
    match channels {
        [] => anyhow::bail!("no audio channels to mix"),
        [mono] => Ok(mono.clone()),
        [first, rest @ ..] => {
            let len = first.len();
            let mut mixed = first.clone();
            for channel in rest {
                if channel.len() != len {
                    anyhow::bail!("channel length mismatch in mono mixdown");
                }
                for (acc, value) in mixed.iter_mut().zip(channel) {
                    *acc += *value;
                }
            }
            let scale = 1.0 / channels.len() as f32;
            for value in &mut mixed {
                *value *= scale;
            }
            Ok(mixed)
        }
    }
}

/// Resample a mono waveform from `from_rate` to `to_rate`.
///
/// Input already at the target rate is returned unchanged, bit for bit.
pub fn resample(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }

    let input_len = samples.len();
    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input_len, 1)?;
    let mut output = resampler.process(&[samples], None)?;
    Ok(output.remove(0))
}

/// Read channels at `from_rate` and produce a mono waveform at `to_rate`.
pub fn convert_to_mono(channels: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    let mono = mix_to_mono(channels)?;
    resample(mono, from_rate, to_rate)
}

#[cfg(test)]
mod tests {
    use super::{convert_to_mono, mix_to_mono, resample};

    #[test]
    fn equal_rate_is_a_bit_identical_passthrough() {
        let samples = vec![0.0_f32, 0.25, -0.5, 1.0, -1.0];
        let output = resample(samples.clone(), 16000, 16000).expect("resample");
        assert_eq!(output, samples);
    }

    #[test]
    fn mixdown_averages_channels() {
        let channels = vec![vec![1.0_f32, 0.0], vec![0.0, 1.0]];
        let mono = mix_to_mono(&channels).expect("mix");
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn mixdown_rejects_ragged_channels() {
        let channels = vec![vec![1.0_f32, 0.0], vec![0.0]];
        assert!(mix_to_mono(&channels).is_err());
    }

    #[test]
    fn downsamples_preserving_duration() {
        let channels = vec![vec![0.1_f32; 4800]];
        let output = convert_to_mono(&channels, 48000, 16000).expect("convert");
        // One frame of tolerance at the target rate.
        let expected = 1600;
        assert!((output.len() as i64 - expected).unsigned_abs() as usize <= 160);
    }
}
