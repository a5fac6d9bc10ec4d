//! Pipeline assembly and per-utterance orchestration.
//!
//! [`PipelineContext`] is the run's single immutable context object: it owns
//! the feature extractor, prompt builder, model facade and synthesis pipeline,
//! and is constructed once at startup. The driver calls
//! [`PipelineContext::process_group`] per batch; failures come back as
//! reason-coded [`StageError`]s so one bad utterance never aborts a run.

use crate::audio::io::read_wav;
use crate::audio::resample::convert_to_mono;
use crate::batch::collate;
use crate::config::Config;
use crate::download::resolve_weights_path;
use crate::features::{Cmvn, FeatureExtractor, FeatureSequence};
use crate::locator::{locate_latents, slice_latents, LocateError};
use crate::manifest::Utterance;
use crate::model::linear::{
    ConcatAdapter, FrameVocoder, PoolingSpeakerEncoder, ProjectionEncoder, TiedEmbeddingLm,
};
use crate::model::{
    CausalLm, GenerationResult, SpeechEncoder, SpeechLmModel, SynthesisPipeline,
};
use crate::prompt::{PromptBuilder, PromptExample, SpmTokenizer, AUDIO_START_TOKEN};
use crate::prompt::{Task, Tokenizer};
use anyhow::{Context as _, Result};
use burn::tensor::backend::Backend;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

/// Sample rate consumed by the acoustic front end.
pub const FEATURE_SAMPLE_RATE: u32 = 16000;

/// Why one utterance failed.
///
/// Every variant maps to one pipeline stage; the run carries on with the next
/// utterance regardless of which stage failed.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("feature extraction failed: {0:#}")]
    Extraction(anyhow::Error),
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
    #[error(transparent)]
    MissingSentinel(#[from] LocateError),
    #[error("synthesis failed: {0:#}")]
    Synthesis(anyhow::Error),
}

impl StageError {
    /// Stable reason code for logs and summaries.
    pub fn reason_code(&self) -> &'static str {
        match self {
            StageError::Extraction(_) => "extraction-error",
            StageError::Generation(_) => "generation-error",
            StageError::MissingSentinel(_) => "missing-sentinel",
            StageError::Synthesis(_) => "synthesis-error",
        }
    }
}

/// Successful per-utterance output.
#[derive(Debug, Clone)]
pub struct UtteranceOutput {
    /// Text-only portion of the decoded generation.
    pub text: String,
    /// Synthesized waveform location.
    pub wav_path: PathBuf,
}

/// Outcome for one utterance, in input order.
#[derive(Debug)]
pub struct UtteranceReport {
    pub id: String,
    pub result: Result<UtteranceOutput, StageError>,
}

/// Outcome for one batch group.
#[derive(Debug)]
pub struct GroupReport {
    pub reports: Vec<UtteranceReport>,
    /// Wall-clock time spent in embedding + generation.
    pub generation_time: Duration,
}

/// Immutable per-run context threading every component of the pipeline.
pub struct PipelineContext<B: Backend> {
    config: Config,
    extractor: FeatureExtractor,
    prompts: PromptBuilder,
    speech_lm: SpeechLmModel<B>,
    synthesis: SynthesisPipeline<B>,
    audio_start_id: i64,
    device: B::Device,
}

impl<B: Backend> PipelineContext<B> {
    /// Assemble a context from pre-built parts.
    ///
    /// Fails when the vocabulary lacks the audio-start marker, which makes
    /// synthesis impossible for the whole run.
    pub fn from_parts(
        config: Config,
        extractor: FeatureExtractor,
        prompts: PromptBuilder,
        speech_lm: SpeechLmModel<B>,
        synthesis: SynthesisPipeline<B>,
        device: B::Device,
    ) -> Result<Self> {
        let audio_start_id = prompts.audio_start_id()?;
        Ok(Self {
            config,
            extractor,
            prompts,
            speech_lm,
            synthesis,
            audio_start_id,
            device,
        })
    }

    /// Load every component named by the configuration.
    ///
    /// All failures here are startup-fatal: nothing has been processed yet and
    /// the run cannot proceed without its models, statistics, vocabulary and
    /// voice reference.
    pub fn load(mut config: Config, task: Task, device: &B::Device) -> Result<Self> {
        let cmvn_path = resolve_weights_path(config.paths.require("cmvn_path")?)?;
        let cmvn = Cmvn::load(cmvn_path)?;
        let extractor = FeatureExtractor::new(
            config.features.fbank_config(),
            config.features.lfr_config(),
            cmvn,
        )?;

        let tokenizer_path = resolve_weights_path(&config.paths.tokenizer_or_default()?)?;
        let tokenizer = SpmTokenizer::open(&tokenizer_path)
            .with_context(|| format!("failed to load tokenizer {}", tokenizer_path.display()))?;
        fill_token_ids(&mut config, &tokenizer);
        let prompts = PromptBuilder::new(Box::new(tokenizer), config.prompt_template, task);

        let encoder_path = resolve_weights_path(config.paths.require("encoder_path")?)?;
        let encoder = ProjectionEncoder::<B>::load(&encoder_path, device)?;
        if encoder.input_dim() != extractor.output_dim() {
            anyhow::bail!(
                "encoder expects {}-dimensional features but the front end produces {}",
                encoder.input_dim(),
                extractor.output_dim()
            );
        }

        let adapter_path = resolve_weights_path(config.paths.require("adapter_path")?)?;
        let adapter =
            ConcatAdapter::<B>::load(&adapter_path, config.adapter_downsample_rate, device)?;
        if adapter.input_dim() != encoder.output_dim() {
            anyhow::bail!(
                "adapter expects {}-dimensional encoded frames but the encoder produces {}",
                adapter.input_dim(),
                encoder.output_dim()
            );
        }

        let llm_path = resolve_weights_path(config.paths.require("llm_path")?)?;
        let lora_path = config
            .paths
            .lora_path
            .as_deref()
            .map(resolve_weights_path)
            .transpose()?;
        let llm = TiedEmbeddingLm::<B>::load(&llm_path, lora_path.as_deref(), device)?;

        let vocoder_path = resolve_weights_path(config.paths.require("vocoder_path")?)?;
        let vocoder =
            FrameVocoder::<B>::load(&vocoder_path, config.vocoder_sample_rate, device)?;
        if vocoder.input_dim() != llm.hidden_dim() {
            anyhow::bail!(
                "vocoder expects {}-dimensional latents but the LLM hidden size is {}",
                vocoder.input_dim(),
                llm.hidden_dim()
            );
        }

        let spk_path = resolve_weights_path(config.paths.require("spk_encoder_path")?)?;
        let speaker_encoder = PoolingSpeakerEncoder::<B>::load(&spk_path, device)?;
        if speaker_encoder.output_dim() != vocoder.speaker_dim() {
            anyhow::bail!(
                "speaker encoder produces {}-dimensional embeddings but the vocoder expects {}",
                speaker_encoder.output_dim(),
                vocoder.speaker_dim()
            );
        }

        let prompt_wav = resolve_weights_path(config.paths.require("prompt_wav_path")?)?;
        let synthesis =
            SynthesisPipeline::from_prompt_wav(Box::new(vocoder), &speaker_encoder, prompt_wav)?;

        let speech_lm = SpeechLmModel::new(
            Box::new(encoder),
            Box::new(adapter),
            Box::new(llm),
            config.generation.clone(),
            config.load_dtype,
        )?;

        Self::from_parts(config, extractor, prompts, speech_lm, synthesis, device.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn task(&self) -> Task {
        self.prompts.task()
    }

    /// Extract normalized features for one utterance.
    fn extract_features(&self, wav_path: &Path) -> Result<FeatureSequence> {
        let (channels, sample_rate) = read_wav(wav_path)?;
        let mono = convert_to_mono(&channels, sample_rate, FEATURE_SAMPLE_RATE)?;
        self.extractor.extract(&mono)
    }

    /// Process one batch group end to end.
    ///
    /// Reports come back in input order. Waveforms are written to
    /// `<output_dir>/<utt_id>.tts.wav`, and only for utterances whose every
    /// stage succeeded.
    pub fn process_group(&self, group: &[Utterance], output_dir: &Path) -> GroupReport {
        let mut results: Vec<Option<Result<UtteranceOutput, StageError>>> =
            group.iter().map(|_| None).collect();

        // Stage 1: per-utterance feature extraction and prompt construction.
        let mut examples: Vec<PromptExample> = Vec::with_capacity(group.len());
        let mut live: Vec<usize> = Vec::with_capacity(group.len());
        for (idx, utterance) in group.iter().enumerate() {
            let example = self
                .extract_features(&utterance.wav_path)
                .and_then(|features| {
                    self.prompts
                        .build(features, self.speech_lm.downsample_rate())
                });
            match example {
                Ok(example) => {
                    examples.push(example);
                    live.push(idx);
                }
                Err(err) => results[idx] = Some(Err(StageError::Extraction(err))),
            }
        }

        if examples.is_empty() {
            return GroupReport {
                reports: finish_reports(group, results),
                generation_time: Duration::ZERO,
            };
        }

        // Stage 2: batched embedding + generation, timed as the group's
        // inference cost.
        let pad_id = self.prompts.tokenizer().pad_id();
        let started = Instant::now();
        let generated = collate::<B>(&examples, pad_id, &self.device)
            .and_then(|batch| {
                let embedding = self.speech_lm.embed(&batch)?;
                let ids = self.speech_lm.generate_text(&embedding)?;
                Ok((embedding, ids))
            });
        let generation_time = started.elapsed();

        let (embedding, generated_ids) = match generated {
            Ok(parts) => parts,
            Err(err) => {
                let message = format!("{err:#}");
                for idx in live {
                    results[idx] =
                        Some(Err(StageError::Generation(anyhow::anyhow!(message.clone()))));
                }
                return GroupReport {
                    reports: finish_reports(group, results),
                    generation_time,
                };
            }
        };

        // Decode every example up front; ids and texts stay parallel to the
        // live examples for the rest of the group's lifetime.
        let mut texts = Vec::with_capacity(generated_ids.len());
        let mut decode_errors: Vec<Option<StageError>> = Vec::with_capacity(generated_ids.len());
        for ids in &generated_ids {
            match self.prompts.tokenizer().decode(ids) {
                Ok(text) => {
                    texts.push(text);
                    decode_errors.push(None);
                }
                Err(err) => {
                    texts.push(String::new());
                    decode_errors.push(Some(StageError::Generation(err)));
                }
            }
        }
        let generation = GenerationResult {
            token_ids: generated_ids,
            texts,
        };

        // Stage 3: per-example latent recovery and synthesis.
        for ((example_idx, &group_idx), decode_error) in
            live.iter().enumerate().zip(decode_errors)
        {
            let utterance = &group[group_idx];
            results[group_idx] = Some(match decode_error {
                Some(err) => Err(err),
                None => self.finish_utterance(
                    utterance,
                    &embedding,
                    example_idx,
                    &generation,
                    output_dir,
                ),
            });
        }

        GroupReport {
            reports: finish_reports(group, results),
            generation_time,
        }
    }

    /// Teacher forcing, latent location, synthesis and logging for one
    /// generated example.
    fn finish_utterance(
        &self,
        utterance: &Utterance,
        embedding: &crate::model::MultimodalEmbedding<B>,
        example_idx: usize,
        generation: &GenerationResult,
        output_dir: &Path,
    ) -> Result<UtteranceOutput, StageError> {
        let generated_ids = &generation.token_ids[example_idx];
        let (embeds, mask) = embedding.example(example_idx);
        let hidden = self
            .speech_lm
            .forward_with_hidden_states(embeds, mask, generated_ids)
            .map_err(StageError::Generation)?;

        let span = locate_latents(
            generated_ids,
            embedding.prompt_and_encoding_len(),
            self.audio_start_id,
            self.config.trailing_control_tokens,
        )?;
        let latents = slice_latents(hidden, span);

        let wav_path = output_dir.join(format!("{}.tts.wav", utterance.id));
        self.synthesis
            .synthesize_to_wav(latents, &wav_path)
            .map_err(StageError::Synthesis)?;

        let text = resolve_output_text(&generation.texts[example_idx]);
        info!("uttid: {}", utterance.id);
        info!("{}: {}", self.task(), text);
        info!("finished writing {}", wav_path.display());

        Ok(UtteranceOutput { text, wav_path })
    }
}

/// Copy generation token ids out of the tokenizer into the decode settings.
fn fill_token_ids(config: &mut Config, tokenizer: &dyn Tokenizer) {
    config.generation.bos_token_id = tokenizer.bos_id();
    config.generation.eos_token_id = tokenizer.eos_id();
    config.generation.pad_token_id = Some(tokenizer.pad_id());
}

/// Keep the text-only prefix of a decoded generation and unescape literal
/// `\n` sequences.
pub fn resolve_output_text(decoded: &str) -> String {
    decoded
        .split(AUDIO_START_TOKEN)
        .next()
        .unwrap_or(decoded)
        .replace("\\n", "\n")
}

fn finish_reports(
    group: &[Utterance],
    results: Vec<Option<Result<UtteranceOutput, StageError>>>,
) -> Vec<UtteranceReport> {
    group
        .iter()
        .zip(results)
        .map(|(utterance, result)| UtteranceReport {
            id: utterance.id.clone(),
            result: result.unwrap_or_else(|| {
                Err(StageError::Generation(anyhow::anyhow!(
                    "utterance was never processed"
                )))
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{resolve_output_text, StageError};
    use crate::locator::LocateError;

    #[test]
    fn output_text_stops_at_the_audio_marker() {
        let decoded = "Guten Tag.<|audio_start|>latent latent<|audio_end|>";
        assert_eq!(resolve_output_text(decoded), "Guten Tag.");
    }

    #[test]
    fn output_text_unescapes_newlines() {
        assert_eq!(resolve_output_text("line one\\nline two"), "line one\nline two");
    }

    #[test]
    fn output_text_without_marker_passes_through() {
        assert_eq!(resolve_output_text("plain text"), "plain text");
    }

    #[test]
    fn reason_codes_name_the_failing_stage() {
        let extraction = StageError::Extraction(anyhow::anyhow!("bad wav"));
        assert_eq!(extraction.reason_code(), "extraction-error");

        let sentinel = StageError::from(LocateError::MissingAudioStart { token_id: 9 });
        assert_eq!(sentinel.reason_code(), "missing-sentinel");
        assert!(sentinel.to_string().contains("not present"));
    }
}
