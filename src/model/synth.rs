//! Speaker-conditioned synthesis: vocoder plus a precomputed speaker
//! embedding.
//!
//! The speaker embedding is computed once at startup from a prompt voice
//! sample and shared read-only across every utterance in the run.

use crate::audio::io::write_wav;
use crate::audio::resample::convert_to_mono;
use crate::model::{SpeakerEncoder, Vocoder};
use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::path::Path;

/// Sample rate expected by the speaker encoder.
const SPEAKER_SAMPLE_RATE: u32 = 16000;

/// Vocoder and the run-wide speaker embedding.
pub struct SynthesisPipeline<B: Backend> {
    vocoder: Box<dyn Vocoder<B>>,
    speaker_embedding: Tensor<B, 2>,
}

impl<B: Backend> SynthesisPipeline<B> {
    /// Build the pipeline from an already-computed speaker embedding.
    pub fn new(vocoder: Box<dyn Vocoder<B>>, speaker_embedding: Tensor<B, 2>) -> Self {
        Self {
            vocoder,
            speaker_embedding,
        }
    }

    /// Build the pipeline by encoding a prompt voice sample.
    ///
    /// Synthesis cannot proceed without a voice reference, so any failure here
    /// (missing file, unreadable audio) is fatal for the run.
    pub fn from_prompt_wav(
        vocoder: Box<dyn Vocoder<B>>,
        speaker_encoder: &dyn SpeakerEncoder<B>,
        prompt_wav_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let path = prompt_wav_path.as_ref();
        let (channels, sample_rate) = crate::audio::io::read_wav(path)
            .with_context(|| format!("failed to read prompt voice sample {}", path.display()))?;
        let mono = convert_to_mono(&channels, sample_rate, SPEAKER_SAMPLE_RATE)?;
        let speaker_embedding = speaker_encoder
            .embed(&mono)
            .context("failed to compute speaker embedding from prompt voice sample")?;
        Ok(Self::new(vocoder, speaker_embedding))
    }

    /// The run-wide speaker embedding, `[1, speaker_dim]`.
    pub fn speaker_embedding(&self) -> &Tensor<B, 2> {
        &self.speaker_embedding
    }

    /// Output sample rate of the vocoder.
    pub fn sample_rate(&self) -> u32 {
        self.vocoder.sample_rate()
    }

    /// Synthesize audio latents into a waveform.
    pub fn synthesize(&self, latents: Tensor<B, 3>) -> Result<Vec<f32>> {
        let waveform = self
            .vocoder
            .synthesize(latents, &self.speaker_embedding)?;
        let samples = waveform.dims()[1];
        let data = waveform.reshape([samples]).into_data();
        let values = data
            .as_slice::<f32>()
            .map_err(|err| anyhow::anyhow!("waveform buffer conversion failed: {err:?}"))?;
        Ok(values.to_vec())
    }

    /// Synthesize and persist a waveform.
    ///
    /// The file is created only after synthesis has fully succeeded, so a
    /// failed utterance never leaves a partial output behind.
    pub fn synthesize_to_wav(&self, latents: Tensor<B, 3>, out_path: impl AsRef<Path>) -> Result<()> {
        let samples = self.synthesize(latents)?;
        write_wav(out_path, &samples, self.vocoder.sample_rate())
    }
}
