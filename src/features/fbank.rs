//! Log-mel filter-bank extraction.
//!
//! Implemented literally: Hann window, direct DFT over zero-padded frames, HTK
//! mel triangles, natural-log energies with a floor. Tables are built once per
//! extractor so the per-frame loop stays allocation-free.

use anyhow::Result;

/// Filter-bank front-end parameters.
#[derive(Debug, Clone, Copy)]
pub struct FbankConfig {
    /// Input sample rate in Hz.
    pub sample_rate: u32,
    /// Number of mel bins per frame.
    pub num_bins: usize,
    /// Analysis window length in samples (25 ms at 16 kHz).
    pub frame_length: usize,
    /// Hop between adjacent frames in samples (10 ms at 16 kHz).
    pub frame_shift: usize,
    /// DFT size; frames are zero-padded up to this length.
    pub fft_size: usize,
}

impl Default for FbankConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            num_bins: 80,
            frame_length: 400,
            frame_shift: 160,
            fft_size: 512,
        }
    }
}

/// Floor applied to mel energies before the log.
const ENERGY_FLOOR: f32 = 1e-10;

#[derive(Debug)]
pub struct Fbank {
    config: FbankConfig,
    window: Vec<f32>,
    // [num_bins * num_freqs] triangular mel weights.
    filters: Vec<f32>,
    // [num_freqs * fft_size] DFT basis.
    dft_cos: Vec<f32>,
    dft_sin: Vec<f32>,
}

impl Fbank {
    pub fn new(config: FbankConfig) -> Self {
        let num_freqs = config.fft_size / 2 + 1;
        let window = hann_window(config.frame_length);
        let filters = mel_filters(&config);
        let (dft_cos, dft_sin) = dft_tables(config.fft_size, num_freqs);
        Self {
            config,
            window,
            filters,
            dft_cos,
            dft_sin,
        }
    }

    pub fn num_bins(&self) -> usize {
        self.config.num_bins
    }

    /// Number of frames produced for a waveform of `samples` samples.
    pub fn frame_count(&self, samples: usize) -> usize {
        if samples < self.config.frame_length {
            0
        } else {
            1 + (samples - self.config.frame_length) / self.config.frame_shift
        }
    }

    /// Compute log-mel features for a mono waveform.
    ///
    /// # Errors
    ///
    /// Fails when the waveform is shorter than one analysis window.
    pub fn compute(&self, samples: &[f32]) -> Result<Vec<Vec<f32>>> {
        let frames = self.frame_count(samples.len());
        if frames == 0 {
            anyhow::bail!(
                "waveform too short for feature extraction: {} samples, need at least {}",
                samples.len(),
                self.config.frame_length
            );
        }

        let num_freqs = self.config.fft_size / 2 + 1;
        let mut buffer = vec![0.0_f32; self.config.fft_size];
        let mut power = vec![0.0_f32; num_freqs];
        let mut output = Vec::with_capacity(frames);

        for frame_idx in 0..frames {
            let start = frame_idx * self.config.frame_shift;
            let frame = &samples[start..start + self.config.frame_length];

            // DC removal, then window, then zero-pad to the DFT size.
            let mean = frame.iter().sum::<f32>() / frame.len() as f32;
            for (slot, (value, weight)) in buffer.iter_mut().zip(frame.iter().zip(&self.window)) {
                *slot = (value - mean) * weight;
            }
            for slot in buffer.iter_mut().skip(self.config.frame_length) {
                *slot = 0.0;
            }

            for (k, value) in power.iter_mut().enumerate() {
                let cos_row = &self.dft_cos[k * self.config.fft_size..(k + 1) * self.config.fft_size];
                let sin_row = &self.dft_sin[k * self.config.fft_size..(k + 1) * self.config.fft_size];
                let mut re = 0.0_f32;
                let mut im = 0.0_f32;
                for ((x, c), s) in buffer.iter().zip(cos_row).zip(sin_row) {
                    re += x * c;
                    im -= x * s;
                }
                *value = re * re + im * im;
            }

            let mut bins = vec![0.0_f32; self.config.num_bins];
            for (m, bin) in bins.iter_mut().enumerate() {
                let row = &self.filters[m * num_freqs..(m + 1) * num_freqs];
                let energy: f32 = row.iter().zip(&power).map(|(w, p)| w * p).sum();
                *bin = energy.max(ENERGY_FLOOR).ln();
            }
            output.push(bins);
        }

        Ok(output)
    }
}

fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let angle = 2.0 * std::f32::consts::PI * i as f32 / len as f32;
            0.5 * (1.0 - angle.cos())
        })
        .collect()
}

#[inline]
fn hertz_to_mel(freq: f32) -> f32 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

#[inline]
fn mel_to_hertz(mel: f32) -> f32 {
    700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0)
}

fn mel_filters(config: &FbankConfig) -> Vec<f32> {
    let num_freqs = config.fft_size / 2 + 1;
    let nyquist = config.sample_rate as f32 / 2.0;

    let mel_min = hertz_to_mel(0.0);
    let mel_max = hertz_to_mel(nyquist);
    let edges: Vec<f32> = (0..config.num_bins + 2)
        .map(|i| {
            let mel = mel_min + (mel_max - mel_min) * i as f32 / (config.num_bins + 1) as f32;
            mel_to_hertz(mel)
        })
        .collect();

    let mut filters = vec![0.0_f32; config.num_bins * num_freqs];
    for m in 0..config.num_bins {
        let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
        for k in 0..num_freqs {
            let freq = k as f32 * config.sample_rate as f32 / config.fft_size as f32;
            let weight = if freq <= left || freq >= right {
                0.0
            } else if freq <= center {
                (freq - left) / (center - left)
            } else {
                (right - freq) / (right - center)
            };
            filters[m * num_freqs + k] = weight;
        }
    }
    filters
}

fn dft_tables(fft_size: usize, num_freqs: usize) -> (Vec<f32>, Vec<f32>) {
    let mut cos_t = vec![0.0_f32; num_freqs * fft_size];
    let mut sin_t = vec![0.0_f32; num_freqs * fft_size];
    for k in 0..num_freqs {
        for n in 0..fft_size {
            let angle = 2.0 * std::f32::consts::PI * k as f32 * n as f32 / fft_size as f32;
            cos_t[k * fft_size + n] = angle.cos();
            sin_t[k * fft_size + n] = angle.sin();
        }
    }
    (cos_t, sin_t)
}
