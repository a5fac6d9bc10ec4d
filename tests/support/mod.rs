//! Shared test doubles for the five external model components and the
//! tokenizer, plus fixture helpers.

use anyhow::Result;
use burn::tensor::{Bool, Int, Tensor, TensorData};
use burn_ndarray::{NdArray, NdArrayDevice};
use std::path::Path;
use tolk::config::{Config, Precision};
use tolk::features::{Cmvn, FbankConfig, FeatureExtractor, LfrConfig};
use tolk::model::{
    CausalLm, GenerationConfig, ModalityAdapter, SpeakerEncoder, SpeechEncoder, SpeechLmModel,
    SynthesisPipeline, Vocoder,
};
use tolk::prompt::{PromptBuilder, PromptTemplate, Task, Tokenizer, AUDIO_START_TOKEN};
use tolk::runtime::PipelineContext;

pub type TestBackend = NdArray<f32>;

/// Id the mock vocabulary assigns to the audio-start marker.
pub const AUDIO_START_ID: i64 = 7;
/// Id the mock vocabulary decodes to a literal `\n` escape.
pub const NEWLINE_ESCAPE_ID: i64 = 8;

/// Deterministic stand-in vocabulary: four prompt ids, bracketed decoding.
pub struct MockTokenizer;

impl Tokenizer for MockTokenizer {
    fn encode(&self, _text: &str) -> Result<Vec<i64>> {
        Ok(vec![11, 12, 13, 14])
    }

    fn decode(&self, ids: &[i64]) -> Result<String> {
        Ok(ids
            .iter()
            .map(|&id| match id {
                AUDIO_START_ID => AUDIO_START_TOKEN.to_string(),
                NEWLINE_ESCAPE_ID => "\\n".to_string(),
                other => format!("[{other}]"),
            })
            .collect())
    }

    fn token_id(&self, piece: &str) -> Option<i64> {
        (piece == AUDIO_START_TOKEN).then_some(AUDIO_START_ID)
    }

    fn pad_id(&self) -> i64 {
        0
    }

    fn bos_id(&self) -> Option<i64> {
        None
    }

    fn eos_id(&self) -> Option<i64> {
        Some(2)
    }
}

/// Keeps the leading `dim` feature dimensions of every frame.
pub struct SliceEncoder {
    pub dim: usize,
}

impl SpeechEncoder<TestBackend> for SliceEncoder {
    fn encode(
        &self,
        features: Tensor<TestBackend, 3>,
        _lengths: &[usize],
    ) -> Result<Tensor<TestBackend, 3>> {
        Ok(features.narrow(2, 0, self.dim))
    }

    fn output_dim(&self) -> usize {
        self.dim
    }
}

/// Keeps every `rate`-th encoded frame.
pub struct StrideAdapter {
    pub rate: usize,
    pub dim: usize,
}

impl ModalityAdapter<TestBackend> for StrideAdapter {
    fn forward(&self, encoded: Tensor<TestBackend, 3>) -> Result<Tensor<TestBackend, 3>> {
        let frames = encoded.dims()[1];
        let out = frames / self.rate;
        if out == 0 {
            anyhow::bail!("too few frames to adapt");
        }
        let rows: Vec<_> = (0..out)
            .map(|idx| encoded.clone().narrow(1, idx * self.rate, 1))
            .collect();
        Ok(Tensor::cat(rows, 1))
    }

    fn downsample_rate(&self) -> usize {
        self.rate
    }

    fn output_dim(&self) -> usize {
        self.dim
    }
}

/// Language model that always generates a fixed script and reports each
/// position's index as its hidden state.
pub struct ScriptedLm {
    pub script: Vec<i64>,
    pub dim: usize,
}

impl CausalLm<TestBackend> for ScriptedLm {
    fn embed_tokens(&self, ids: Tensor<TestBackend, 2, Int>) -> Result<Tensor<TestBackend, 3>> {
        let [batch, seq] = ids.dims();
        Ok(ids.float().reshape([batch, seq, 1]).repeat_dim(2, self.dim))
    }

    fn generate(
        &self,
        input_embeds: Tensor<TestBackend, 3>,
        _attention_mask: Tensor<TestBackend, 2, Bool>,
        _config: &GenerationConfig,
    ) -> Result<Vec<Vec<i64>>> {
        Ok(vec![self.script.clone(); input_embeds.dims()[0]])
    }

    fn forward_hidden_states(
        &self,
        input_embeds: Tensor<TestBackend, 3>,
        _attention_mask: Tensor<TestBackend, 2, Bool>,
    ) -> Result<Tensor<TestBackend, 3>> {
        let [batch, seq, dim] = input_embeds.dims();
        let mut values = Vec::with_capacity(batch * seq * dim);
        for _ in 0..batch {
            for position in 0..seq {
                values.extend(std::iter::repeat(position as f32).take(dim));
            }
        }
        Ok(Tensor::from_data(
            TensorData::new(values, [batch, seq, dim]),
            &input_embeds.device(),
        ))
    }

    fn hidden_dim(&self) -> usize {
        self.dim
    }
}

/// Emits `samples_per_frame` copies of each latent frame's first component.
pub struct MockVocoder {
    pub samples_per_frame: usize,
}

impl Vocoder<TestBackend> for MockVocoder {
    fn synthesize(
        &self,
        latents: Tensor<TestBackend, 3>,
        _speaker: &Tensor<TestBackend, 2>,
    ) -> Result<Tensor<TestBackend, 2>> {
        let [batch, frames, _] = latents.dims();
        let first = latents.narrow(2, 0, 1);
        Ok(first
            .repeat_dim(2, self.samples_per_frame)
            .reshape([batch, frames * self.samples_per_frame]))
    }

    fn sample_rate(&self) -> u32 {
        24000
    }
}

/// Constant speaker embedding.
pub struct MockSpeakerEncoder;

impl SpeakerEncoder<TestBackend> for MockSpeakerEncoder {
    fn embed(&self, _samples: &[f32]) -> Result<Tensor<TestBackend, 2>> {
        let device = NdArrayDevice::default();
        Ok(Tensor::from_data(
            TensorData::new(vec![0.25_f32; 4], [1, 4]),
            &device,
        ))
    }
}

/// Hidden width shared by the mock components.
pub const HIDDEN_DIM: usize = 8;

/// Generated script with the audio marker at offset 3 and a six-token
/// control tail, leaving a three-frame latent span.
pub fn scripted_ids_with_marker() -> Vec<i64> {
    vec![30, NEWLINE_ESCAPE_ID, 31, AUDIO_START_ID, 40, 41, 42, 43, 44, 45, 46, 2]
}

/// The feature extractor used across integration tests: default front end
/// with pass-through statistics.
pub fn test_extractor() -> FeatureExtractor {
    let lfr = LfrConfig::default();
    let dim = 80 * lfr.m;
    let cmvn = Cmvn::new(vec![0.0; dim], vec![1.0; dim]).expect("cmvn");
    FeatureExtractor::new(FbankConfig::default(), lfr, cmvn).expect("extractor")
}

/// Assemble a full pipeline context from mock components.
pub fn test_context(task: Task, script: Vec<i64>) -> PipelineContext<TestBackend> {
    let config = Config::default();
    let prompts = PromptBuilder::new(Box::new(MockTokenizer), PromptTemplate::Qwen, task);
    let speech_lm = SpeechLmModel::new(
        Box::new(SliceEncoder { dim: HIDDEN_DIM }),
        Box::new(StrideAdapter {
            rate: config.adapter_downsample_rate,
            dim: HIDDEN_DIM,
        }),
        Box::new(ScriptedLm {
            script,
            dim: HIDDEN_DIM,
        }),
        GenerationConfig::default(),
        Precision::Float32,
    )
    .expect("speech lm");

    let speaker = MockSpeakerEncoder.embed(&[0.0; 16]).expect("speaker");
    let synthesis = SynthesisPipeline::new(Box::new(MockVocoder { samples_per_frame: 4 }), speaker);

    PipelineContext::from_parts(
        config,
        test_extractor(),
        prompts,
        speech_lm,
        synthesis,
        NdArrayDevice::default(),
    )
    .expect("context")
}

/// Write a mono sine-wave WAV file.
pub fn write_sine_wav(path: &Path, seconds: f32, sample_rate: u32) {
    let total = (seconds * sample_rate as f32) as usize;
    let samples: Vec<f32> = (0..total)
        .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sample_rate as f32).sin() * 0.3)
        .collect();
    tolk::audio::io::write_wav(path, &samples, sample_rate).expect("write sine wav");
}
