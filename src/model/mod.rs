//! Capability interfaces for the external model components.
//!
//! The pipeline treats the speech encoder, modality adapter, language model,
//! vocoder and speaker encoder as black boxes behind these traits. The
//! `linear` module ships weight-backed reference implementations;
//! `speech_lm` wires encoder + adapter + LLM into the multimodal facade and
//! `synth` pairs the vocoder with a precomputed speaker embedding.

pub mod linear;
pub mod speech_lm;
pub mod synth;

use anyhow::Result;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Int, Tensor};
use serde::{Deserialize, Serialize};

pub use speech_lm::{MultimodalEmbedding, SpeechLmModel};
pub use synth::SynthesisPipeline;

/// Decoding parameters handed to the language model.
///
/// Defaults mirror the model's stored generation settings; the token ids are
/// filled in from the tokenizer at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GenerationConfig {
    /// Maximum number of tokens to generate.
    pub max_new_tokens: usize,
    /// Beam count for backends with beam-sampled decoding.
    pub num_beams: usize,
    /// Whether to sample (as opposed to greedy decoding).
    pub do_sample: bool,
    /// Softmax temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Penalty applied to already-generated tokens.
    pub repetition_penalty: f32,
    /// Length penalty for beam scoring.
    pub length_penalty: f32,
    /// Minimum number of generated tokens.
    pub min_length: usize,
    /// Beginning-of-sequence token id.
    #[serde(skip)]
    pub bos_token_id: Option<i64>,
    /// End-of-sequence token id; generation stops when it is produced.
    #[serde(skip)]
    pub eos_token_id: Option<i64>,
    /// Padding token id.
    #[serde(skip)]
    pub pad_token_id: Option<i64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 1000,
            num_beams: 4,
            do_sample: true,
            temperature: 1.0,
            top_p: 0.85,
            repetition_penalty: 1.0,
            length_penalty: 1.0,
            min_length: 1,
            bos_token_id: None,
            eos_token_id: None,
            pad_token_id: None,
        }
    }
}

/// Decoder output for one batch: generated ids and decoded text per example,
/// in input order. Immutable once produced.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub token_ids: Vec<Vec<i64>>,
    pub texts: Vec<String>,
}

/// Speech encoder: feature frames to encoded frames.
pub trait SpeechEncoder<B: Backend>: Send {
    /// Encode `[batch, frames, feature_dim]` features; `lengths` carries the
    /// unpadded frame count per example.
    fn encode(&self, features: Tensor<B, 3>, lengths: &[usize]) -> Result<Tensor<B, 3>>;

    /// Dimension of encoded frames.
    fn output_dim(&self) -> usize;
}

/// Modality adapter: encoded frames to LLM embedding space, downsampling the
/// sequence by a fixed rate.
pub trait ModalityAdapter<B: Backend>: Send {
    fn forward(&self, encoded: Tensor<B, 3>) -> Result<Tensor<B, 3>>;

    /// Sequence downsampling factor applied by the adapter.
    fn downsample_rate(&self) -> usize;

    /// Dimension of adapted frames (the LLM embedding width).
    fn output_dim(&self) -> usize;
}

/// Causal language model over input embeddings.
pub trait CausalLm<B: Backend>: Send {
    /// Look up embeddings for token ids.
    fn embed_tokens(&self, ids: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>>;

    /// Autoregressive decoding from input embeddings; returns generated token
    /// ids per example, excluding the prompt.
    fn generate(
        &self,
        input_embeds: Tensor<B, 3>,
        attention_mask: Tensor<B, 2, Bool>,
        config: &GenerationConfig,
    ) -> Result<Vec<Vec<i64>>>;

    /// Single forward pass returning final-layer hidden states per position.
    fn forward_hidden_states(
        &self,
        input_embeds: Tensor<B, 3>,
        attention_mask: Tensor<B, 2, Bool>,
    ) -> Result<Tensor<B, 3>>;

    /// Hidden state / embedding width.
    fn hidden_dim(&self) -> usize;
}

/// Speaker-conditioned vocoder: audio latents to a waveform.
pub trait Vocoder<B: Backend>: Send {
    /// Synthesize `[batch, frames, hidden]` latents into `[batch, samples]`.
    fn synthesize(&self, latents: Tensor<B, 3>, speaker: &Tensor<B, 2>) -> Result<Tensor<B, 2>>;

    /// Output waveform sample rate in Hz.
    fn sample_rate(&self) -> u32;
}

/// Speaker encoder: a reference waveform to a fixed-dimension embedding.
pub trait SpeakerEncoder<B: Backend>: Send {
    /// Embed a 16 kHz mono waveform into `[1, speaker_dim]`.
    fn embed(&self, samples: &[f32]) -> Result<Tensor<B, 2>>;
}

#[cfg(test)]
mod tests {
    use super::GenerationConfig;

    #[test]
    fn generation_defaults_match_stored_settings() {
        let config = GenerationConfig::default();
        assert_eq!(config.max_new_tokens, 1000);
        assert_eq!(config.num_beams, 4);
        assert!(config.do_sample);
        assert_eq!(config.temperature, 1.0);
        assert_eq!(config.top_p, 0.85);
        assert_eq!(config.repetition_penalty, 1.0);
        assert_eq!(config.length_penalty, 1.0);
        assert_eq!(config.min_length, 1);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: GenerationConfig =
            serde_yaml::from_str("max_new_tokens: 64\ntemperature: 0.8\n").expect("parse");
        assert_eq!(config.max_new_tokens, 64);
        assert_eq!(config.temperature, 0.8);
        assert_eq!(config.num_beams, 4);
        assert_eq!(config.top_p, 0.85);
    }
}
