//! Weight-backed linear reference components.
//!
//! Each component here implements one of the capability traits with the
//! smallest computation its checkpoint can drive: projections, embedding
//! lookups and a sampled decode loop. They stand behind the same seams the
//! full network ports will use, so the orchestration layer, its tests and the
//! checkpoint plumbing are exercised end to end.
//!
//! Checkpoint layout (all tensors row-major, `[input_dim, output_dim]`):
//! - encoder:  `weight` `[feature_dim, encoder_dim]`, optional `bias`
//! - adapter:  `weight` `[rate * encoder_dim, hidden]`, optional `bias`
//! - llm:      `embed_tokens.weight` `[vocab, hidden]`, `backbone.weight`
//!   `[hidden, hidden]`; optional LoRA delta `lora_a.weight` `[hidden, r]`
//!   and `lora_b.weight` `[r, hidden]` merged at load time
//! - vocoder:  `weight` `[hidden, samples_per_frame]`, optional `bias`,
//!   `speaker_proj.weight` `[speaker_dim, hidden]`
//! - speaker:  `weight` `[window, speaker_dim]`

use crate::model::{CausalLm, GenerationConfig, ModalityAdapter, SpeakerEncoder, SpeechEncoder, Vocoder};
use crate::weights::{load_state_dict, require_tensor, tensor1_from_payload, tensor2_from_payload};
use anyhow::Result;
use burn::tensor::backend::Backend;
use burn::tensor::module::{embedding, linear};
use burn::tensor::{Bool, Distribution, ElementConversion, Int, Tensor, TensorData};
use std::path::Path;

/// Per-frame projection encoder.
#[derive(Debug)]
pub struct ProjectionEncoder<B: Backend> {
    weight: Tensor<B, 2>,
    bias: Option<Tensor<B, 1>>,
}

impl<B: Backend> ProjectionEncoder<B> {
    pub fn load(path: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let state = load_state_dict(path)?;
        let weight = tensor2_from_payload(require_tensor(&state, "weight")?, device)?;
        let bias = state
            .get("bias")
            .map(|payload| tensor1_from_payload(payload, device))
            .transpose()?;
        Ok(Self { weight, bias })
    }

    /// Feature dimension this encoder expects.
    pub fn input_dim(&self) -> usize {
        self.weight.dims()[0]
    }
}

impl<B: Backend> SpeechEncoder<B> for ProjectionEncoder<B> {
    fn encode(&self, features: Tensor<B, 3>, _lengths: &[usize]) -> Result<Tensor<B, 3>> {
        let feature_dim = features.dims()[2];
        if feature_dim != self.input_dim() {
            anyhow::bail!(
                "encoder expects {}-dimensional features, got {feature_dim}",
                self.input_dim()
            );
        }
        Ok(linear(features, self.weight.clone(), self.bias.clone()))
    }

    fn output_dim(&self) -> usize {
        self.weight.dims()[1]
    }
}

/// Downsampling adapter: concatenates `rate` adjacent encoded frames and
/// projects them into the LLM embedding space.
#[derive(Debug)]
pub struct ConcatAdapter<B: Backend> {
    weight: Tensor<B, 2>,
    bias: Option<Tensor<B, 1>>,
    rate: usize,
}

impl<B: Backend> ConcatAdapter<B> {
    pub fn load(path: impl AsRef<Path>, rate: usize, device: &B::Device) -> Result<Self> {
        if rate == 0 {
            anyhow::bail!("adapter downsample rate must be positive");
        }
        let state = load_state_dict(path)?;
        let weight = tensor2_from_payload(require_tensor(&state, "weight")?, device)?;
        if weight.dims()[0] % rate != 0 {
            anyhow::bail!(
                "adapter input dimension {} is not divisible by downsample rate {rate}",
                weight.dims()[0]
            );
        }
        let bias = state
            .get("bias")
            .map(|payload| tensor1_from_payload(payload, device))
            .transpose()?;
        Ok(Self { weight, bias, rate })
    }

    /// Encoded-frame dimension this adapter expects.
    pub fn input_dim(&self) -> usize {
        self.weight.dims()[0] / self.rate
    }
}

impl<B: Backend> ModalityAdapter<B> for ConcatAdapter<B> {
    fn forward(&self, encoded: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
        let [batch, frames, dim] = encoded.dims();
        if dim != self.input_dim() {
            anyhow::bail!(
                "adapter expects {}-dimensional frames, got {dim}",
                self.input_dim()
            );
        }
        let out_frames = frames / self.rate;
        if out_frames == 0 {
            anyhow::bail!("too few encoded frames ({frames}) for downsample rate {}", self.rate);
        }
        let grouped = encoded
            .narrow(1, 0, out_frames * self.rate)
            .reshape([batch, out_frames, self.rate * dim]);
        Ok(linear(grouped, self.weight.clone(), self.bias.clone()))
    }

    fn downsample_rate(&self) -> usize {
        self.rate
    }

    fn output_dim(&self) -> usize {
        self.weight.dims()[1]
    }
}

/// Language model with a tied embedding table and a position-wise backbone.
///
/// Logits are the hidden state's similarity to every embedding row, so the
/// decode loop, sampling controls and teacher-forcing pass all behave like the
/// full model's while staying checkpoint-sized.
#[derive(Debug)]
pub struct TiedEmbeddingLm<B: Backend> {
    embed: Tensor<B, 2>,
    backbone: Tensor<B, 2>,
}

impl<B: Backend> TiedEmbeddingLm<B> {
    pub fn load(
        path: impl AsRef<Path>,
        lora_path: Option<&Path>,
        device: &B::Device,
    ) -> Result<Self> {
        let state = load_state_dict(path)?;
        let embed = tensor2_from_payload(require_tensor(&state, "embed_tokens.weight")?, device)?;
        let mut backbone =
            tensor2_from_payload(require_tensor(&state, "backbone.weight")?, device)?;

        let hidden = embed.dims()[1];
        if backbone.dims() != [hidden, hidden] {
            anyhow::bail!(
                "backbone shape {:?} does not match embedding width {hidden}",
                backbone.dims()
            );
        }

        if let Some(lora_path) = lora_path {
            let lora = load_state_dict(lora_path)?;
            let a = tensor2_from_payload(require_tensor(&lora, "lora_a.weight")?, device)?;
            let b = tensor2_from_payload(require_tensor(&lora, "lora_b.weight")?, device)?;
            if a.dims()[0] != hidden || b.dims()[1] != hidden || a.dims()[1] != b.dims()[0] {
                anyhow::bail!(
                    "LoRA shapes {:?} x {:?} do not compose to [{hidden}, {hidden}]",
                    a.dims(),
                    b.dims()
                );
            }
            // Merge the low-rank delta; the base tensor on disk stays as-is.
            backbone = backbone + a.matmul(b);
        }

        Ok(Self { embed, backbone })
    }

    pub fn vocab_size(&self) -> usize {
        self.embed.dims()[0]
    }

    fn logits_for_last_position(&self, hidden: Tensor<B, 3>) -> Vec<f32> {
        let [_, len, dim] = hidden.dims();
        let last = hidden.narrow(1, len - 1, 1).reshape([1, dim]);
        let logits = last.matmul(self.embed.clone().transpose());
        let data = logits.to_data();
        data.as_slice::<f32>().expect("logits buffer").to_vec()
    }

    fn generate_one(
        &self,
        mut embeds: Tensor<B, 3>,
        config: &GenerationConfig,
    ) -> Result<Vec<i64>> {
        let device = embeds.device();
        let hidden_dim = self.hidden_dim();
        let mut generated: Vec<i64> = Vec::new();

        for _ in 0..config.max_new_tokens {
            let hidden = linear(embeds.clone(), self.backbone.clone(), None);
            let mut logits = self.logits_for_last_position(hidden);

            if config.repetition_penalty != 1.0 {
                for &id in &generated {
                    let slot = &mut logits[id as usize];
                    if *slot > 0.0 {
                        *slot /= config.repetition_penalty;
                    } else {
                        *slot *= config.repetition_penalty;
                    }
                }
            }
            if let Some(eos) = config.eos_token_id {
                if generated.len() + 1 < config.min_length {
                    logits[eos as usize] = f32::NEG_INFINITY;
                }
            }

            let next = if config.do_sample {
                let draw: f32 = Tensor::<B, 1>::random(
                    [1],
                    Distribution::Uniform(0.0, 1.0),
                    &device,
                )
                .into_scalar()
                .elem();
                sample_top_p(&logits, config.temperature, config.top_p, draw)
            } else {
                argmax(&logits)
            } as i64;

            generated.push(next);
            if config.eos_token_id == Some(next) {
                break;
            }

            let row = self
                .embed
                .clone()
                .narrow(0, next as usize, 1)
                .reshape([1, 1, hidden_dim]);
            embeds = Tensor::cat(vec![embeds, row], 1);
        }

        Ok(generated)
    }
}

impl<B: Backend> CausalLm<B> for TiedEmbeddingLm<B> {
    fn embed_tokens(&self, ids: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>> {
        Ok(embedding(self.embed.clone(), ids))
    }

    fn generate(
        &self,
        input_embeds: Tensor<B, 3>,
        _attention_mask: Tensor<B, 2, Bool>,
        config: &GenerationConfig,
    ) -> Result<Vec<Vec<i64>>> {
        let batch = input_embeds.dims()[0];
        let mut outputs = Vec::with_capacity(batch);
        for idx in 0..batch {
            let row = input_embeds.clone().narrow(0, idx, 1);
            outputs.push(self.generate_one(row, config)?);
        }
        Ok(outputs)
    }

    fn forward_hidden_states(
        &self,
        input_embeds: Tensor<B, 3>,
        _attention_mask: Tensor<B, 2, Bool>,
    ) -> Result<Tensor<B, 3>> {
        Ok(linear(input_embeds, self.backbone.clone(), None))
    }

    fn hidden_dim(&self) -> usize {
        self.embed.dims()[1]
    }
}

/// Index of the largest logit.
fn argmax(logits: &[f32]) -> usize {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

/// Nucleus sampling over raw logits with a pre-drawn uniform variate.
fn sample_top_p(logits: &[f32], temperature: f32, top_p: f32, draw: f32) -> usize {
    if temperature <= 0.0 {
        return argmax(logits);
    }

    let max = logits.iter().fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    let mut probs: Vec<(usize, f32)> = logits
        .iter()
        .enumerate()
        .map(|(idx, &logit)| (idx, ((logit - max) / temperature).exp()))
        .collect();
    let total: f32 = probs.iter().map(|(_, p)| p).sum();
    for (_, p) in &mut probs {
        *p /= total;
    }
    probs.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut kept = 0;
    let mut mass = 0.0;
    for (idx, (_, p)) in probs.iter().enumerate() {
        mass += p;
        kept = idx + 1;
        if mass >= top_p {
            break;
        }
    }

    let target = draw.clamp(0.0, 1.0) * mass;
    let mut cumulative = 0.0;
    for (id, p) in &probs[..kept] {
        cumulative += p;
        if cumulative >= target {
            return *id;
        }
    }
    probs[kept - 1].0
}

/// Speaker-conditioned vocoder head: each latent frame maps to a fixed number
/// of output samples.
#[derive(Debug)]
pub struct FrameVocoder<B: Backend> {
    weight: Tensor<B, 2>,
    bias: Option<Tensor<B, 1>>,
    speaker_proj: Tensor<B, 2>,
    sample_rate: u32,
}

impl<B: Backend> FrameVocoder<B> {
    pub fn load(path: impl AsRef<Path>, sample_rate: u32, device: &B::Device) -> Result<Self> {
        let state = load_state_dict(path)?;
        let weight = tensor2_from_payload(require_tensor(&state, "weight")?, device)?;
        let speaker_proj =
            tensor2_from_payload(require_tensor(&state, "speaker_proj.weight")?, device)?;
        if speaker_proj.dims()[1] != weight.dims()[0] {
            anyhow::bail!(
                "speaker projection output {} does not match vocoder input {}",
                speaker_proj.dims()[1],
                weight.dims()[0]
            );
        }
        let bias = state
            .get("bias")
            .map(|payload| tensor1_from_payload(payload, device))
            .transpose()?;
        Ok(Self {
            weight,
            bias,
            speaker_proj,
            sample_rate,
        })
    }

    /// Latent dimension this vocoder expects.
    pub fn input_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Speaker embedding dimension this vocoder conditions on.
    pub fn speaker_dim(&self) -> usize {
        self.speaker_proj.dims()[0]
    }
}

impl<B: Backend> Vocoder<B> for FrameVocoder<B> {
    fn synthesize(&self, latents: Tensor<B, 3>, speaker: &Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        let [batch, frames, dim] = latents.dims();
        if dim != self.input_dim() {
            anyhow::bail!(
                "vocoder expects {}-dimensional latents, got {dim}",
                self.input_dim()
            );
        }
        if speaker.dims()[1] != self.speaker_dim() {
            anyhow::bail!(
                "vocoder expects {}-dimensional speaker embeddings, got {}",
                self.speaker_dim(),
                speaker.dims()[1]
            );
        }

        let conditioning = linear(speaker.clone(), self.speaker_proj.clone(), None).unsqueeze();
        let conditioned = latents + conditioning;
        let samples = linear(conditioned, self.weight.clone(), self.bias.clone());
        let per_frame = self.weight.dims()[1];
        Ok(samples.reshape([batch, frames * per_frame]))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Speaker encoder: mean-pools fixed windows of the reference waveform and
/// projects the pooled frame.
#[derive(Debug)]
pub struct PoolingSpeakerEncoder<B: Backend> {
    weight: Tensor<B, 2>,
}

impl<B: Backend> PoolingSpeakerEncoder<B> {
    pub fn load(path: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let state = load_state_dict(path)?;
        let weight = tensor2_from_payload(require_tensor(&state, "weight")?, device)?;
        Ok(Self { weight })
    }

    pub fn window(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Speaker embedding dimension this encoder produces.
    pub fn output_dim(&self) -> usize {
        self.weight.dims()[1]
    }
}

impl<B: Backend> SpeakerEncoder<B> for PoolingSpeakerEncoder<B> {
    fn embed(&self, samples: &[f32]) -> Result<Tensor<B, 2>> {
        if samples.is_empty() {
            anyhow::bail!("cannot compute a speaker embedding from empty audio");
        }
        let window = self.window();
        let frames = samples.len().div_ceil(window);
        let mut pooled = vec![0.0_f32; window];
        for frame_idx in 0..frames {
            for slot in 0..window {
                let sample = samples.get(frame_idx * window + slot).copied().unwrap_or(0.0);
                pooled[slot] += sample;
            }
        }
        for value in &mut pooled {
            *value /= frames as f32;
        }

        let device = self.weight.device();
        let pooled = Tensor::<B, 2>::from_data(TensorData::new(pooled, [1, window]), &device);
        Ok(linear(pooled, self.weight.clone(), None))
    }
}
