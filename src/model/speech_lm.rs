//! Multimodal facade over the speech encoder, modality adapter and language
//! model.
//!
//! The facade has a two-phase contract: build multimodal input embeddings
//! without touching the language model's decoder, then either run
//! autoregressive text generation or a teacher-forcing forward pass that
//! recovers per-position hidden states.

use crate::batch::Batch;
use crate::config::Precision;
use crate::model::{CausalLm, GenerationConfig, ModalityAdapter, SpeechEncoder};
use anyhow::Result;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Int, Tensor, TensorData};

/// Input embeddings and attention mask for one collated batch.
///
/// The sequence layout per example is `[audio embeddings ++ prompt
/// embeddings ++ padding]`, mirroring the placeholder/prompt id order used by
/// the prompt builder.
#[derive(Debug)]
pub struct MultimodalEmbedding<B: Backend> {
    pub input_embeds: Tensor<B, 3>,
    pub attention_mask: Tensor<B, 2, Bool>,
}

impl<B: Backend> MultimodalEmbedding<B> {
    /// Padded sequence length covering encoding plus prompt positions.
    pub fn prompt_and_encoding_len(&self) -> usize {
        self.input_embeds.dims()[1]
    }

    /// Single-example view `([1, seq, hidden], [1, seq])`.
    pub fn example(&self, idx: usize) -> (Tensor<B, 3>, Tensor<B, 2, Bool>) {
        (
            self.input_embeds.clone().narrow(0, idx, 1),
            self.attention_mask.clone().narrow(0, idx, 1),
        )
    }
}

/// Facade wrapping encoder + adapter + LLM behind the pipeline's two-phase
/// contract.
pub struct SpeechLmModel<B: Backend> {
    encoder: Box<dyn SpeechEncoder<B>>,
    adapter: Box<dyn ModalityAdapter<B>>,
    llm: Box<dyn CausalLm<B>>,
    generation: GenerationConfig,
    precision: Precision,
}

impl<B: Backend> SpeechLmModel<B> {
    /// Wire the three components together, checking dimension agreement.
    pub fn new(
        encoder: Box<dyn SpeechEncoder<B>>,
        adapter: Box<dyn ModalityAdapter<B>>,
        llm: Box<dyn CausalLm<B>>,
        generation: GenerationConfig,
        precision: Precision,
    ) -> Result<Self> {
        if adapter.output_dim() != llm.hidden_dim() {
            anyhow::bail!(
                "adapter output dimension {} does not match LLM hidden dimension {}",
                adapter.output_dim(),
                llm.hidden_dim()
            );
        }
        Ok(Self {
            encoder,
            adapter,
            llm,
            generation,
            precision,
        })
    }

    /// Generation settings read from the model configuration.
    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Compute precision the components were loaded with.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Sequence downsampling factor between feature frames and placeholder
    /// positions.
    pub fn downsample_rate(&self) -> usize {
        self.adapter.downsample_rate()
    }

    /// Phase one: produce multimodal input embeddings without invoking the
    /// language model's decoder.
    ///
    /// Audio embeddings (encoder then adapter) are written over each example's
    /// placeholder span; prompt positions keep their token embeddings. The
    /// batch attention mask passes through unchanged.
    pub fn embed(&self, batch: &Batch<B>) -> Result<MultimodalEmbedding<B>> {
        let encoded = self
            .encoder
            .encode(batch.features.clone(), &batch.feature_lengths)?;
        let adapted = self.adapter.forward(encoded)?;
        let adapted_len = adapted.dims()[1];

        // Placeholder ids are negative sentinels; clamp before lookup so the
        // embedding table never sees them. Their rows are overwritten below.
        let ids = batch.input_ids.clone().clamp_min(0);
        let mut embeds = self.llm.embed_tokens(ids)?;
        let hidden = self.llm.hidden_dim();

        for (idx, &audio_len) in batch.audio_lengths.iter().enumerate() {
            if audio_len == 0 {
                continue;
            }
            if adapted_len < audio_len {
                anyhow::bail!(
                    "adapter produced {adapted_len} frames but example {idx} expects {audio_len} placeholder positions"
                );
            }
            let audio = adapted.clone().slice([idx..idx + 1, 0..audio_len, 0..hidden]);
            embeds = embeds.slice_assign([idx..idx + 1, 0..audio_len, 0..hidden], audio);
        }

        Ok(MultimodalEmbedding {
            input_embeds: embeds,
            attention_mask: batch.attention_mask.clone(),
        })
    }

    /// Phase two: autoregressive text generation over the prepared embeddings.
    pub fn generate_text(&self, embedding: &MultimodalEmbedding<B>) -> Result<Vec<Vec<i64>>> {
        self.llm.generate(
            embedding.input_embeds.clone(),
            embedding.attention_mask.clone(),
            &self.generation,
        )
    }

    /// Teacher-forcing forward pass for one example.
    ///
    /// Embeds the model's own generated ids, appends them (with an all-true
    /// mask block) to the example's input embeddings, and returns the final
    /// layer's hidden states over the combined sequence.
    pub fn forward_with_hidden_states(
        &self,
        example_embeds: Tensor<B, 3>,
        example_mask: Tensor<B, 2, Bool>,
        generated_ids: &[i64],
    ) -> Result<Tensor<B, 3>> {
        if generated_ids.is_empty() {
            return self.llm.forward_hidden_states(example_embeds, example_mask);
        }

        let device = example_embeds.device();
        let gen_len = generated_ids.len();
        let ids = Tensor::<B, 2, Int>::from_data(
            TensorData::new(generated_ids.to_vec(), [1, gen_len]),
            &device,
        );
        let generated_embeds = self.llm.embed_tokens(ids)?;
        let generated_mask = Tensor::<B, 2, Bool>::from_data(
            TensorData::new(vec![true; gen_len], [1, gen_len]),
            &device,
        );

        let embeds = Tensor::cat(vec![example_embeds, generated_embeds], 1);
        let mask = Tensor::cat(vec![example_mask, generated_mask], 1);
        self.llm.forward_hidden_states(embeds, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::SpeechLmModel;
    use crate::batch::collate;
    use crate::config::Precision;
    use crate::features::FeatureSequence;
    use crate::model::{CausalLm, GenerationConfig, ModalityAdapter, SpeechEncoder};
    use crate::prompt::{PromptExample, AUDIO_PLACEHOLDER_ID};
    use anyhow::Result;
    use burn::tensor::{Bool, Int, Tensor};
    use burn_ndarray::{NdArray, NdArrayDevice};

    type B = NdArray<f32>;

    /// Passes features through unchanged.
    struct IdentityEncoder {
        dim: usize,
    }

    impl SpeechEncoder<B> for IdentityEncoder {
        fn encode(&self, features: Tensor<B, 3>, _lengths: &[usize]) -> Result<Tensor<B, 3>> {
            Ok(features)
        }

        fn output_dim(&self) -> usize {
            self.dim
        }
    }

    /// Keeps every `rate`-th frame.
    struct StrideAdapter {
        rate: usize,
        dim: usize,
    }

    impl ModalityAdapter<B> for StrideAdapter {
        fn forward(&self, encoded: Tensor<B, 3>) -> Result<Tensor<B, 3>> {
            let [batch, frames, dim] = encoded.dims();
            let out = frames / self.rate;
            let mut rows = Vec::with_capacity(out);
            for idx in 0..out {
                rows.push(encoded.clone().narrow(1, idx * self.rate, 1));
            }
            if rows.is_empty() {
                anyhow::bail!("no frames to adapt");
            }
            let _ = (batch, dim);
            Ok(Tensor::cat(rows, 1))
        }

        fn downsample_rate(&self) -> usize {
            self.rate
        }

        fn output_dim(&self) -> usize {
            self.dim
        }
    }

    /// Embeds each id as a constant row of the id's value.
    struct ConstantLm {
        dim: usize,
    }

    impl CausalLm<B> for ConstantLm {
        fn embed_tokens(&self, ids: Tensor<B, 2, Int>) -> Result<Tensor<B, 3>> {
            let [batch, seq] = ids.dims();
            Ok(ids
                .float()
                .reshape([batch, seq, 1])
                .repeat_dim(2, self.dim))
        }

        fn generate(
            &self,
            _input_embeds: Tensor<B, 3>,
            _attention_mask: Tensor<B, 2, Bool>,
            _config: &GenerationConfig,
        ) -> Result<Vec<Vec<i64>>> {
            Ok(vec![vec![1, 2, 3]])
        }

        fn forward_hidden_states(
            &self,
            input_embeds: Tensor<B, 3>,
            _attention_mask: Tensor<B, 2, Bool>,
        ) -> Result<Tensor<B, 3>> {
            Ok(input_embeds)
        }

        fn hidden_dim(&self) -> usize {
            self.dim
        }
    }

    fn model(dim: usize) -> SpeechLmModel<B> {
        SpeechLmModel::new(
            Box::new(IdentityEncoder { dim }),
            Box::new(StrideAdapter { rate: 2, dim }),
            Box::new(ConstantLm { dim }),
            GenerationConfig::default(),
            Precision::Float32,
        )
        .expect("model")
    }

    fn example(audio_frames: usize, prompt_ids: &[i64], dim: usize) -> PromptExample {
        let frames: Vec<Vec<f32>> = (0..audio_frames)
            .map(|i| vec![100.0 + i as f32; dim])
            .collect();
        let features = FeatureSequence::new(frames).expect("features");
        let audio_length = features.downsampled_len(2);
        let mut input_ids = vec![AUDIO_PLACEHOLDER_ID; audio_length];
        input_ids.extend_from_slice(prompt_ids);
        let attention_mask = vec![true; input_ids.len()];
        PromptExample {
            input_ids,
            attention_mask,
            prompt_length: prompt_ids.len(),
            audio_length,
            features,
        }
    }

    #[test]
    fn embed_scatters_audio_over_placeholders() {
        let dim = 4;
        let device = NdArrayDevice::default();
        let examples = vec![example(6, &[10, 11], dim)];
        let batch = collate::<B>(&examples, 0, &device).expect("collate");
        let model = model(dim);

        let embedding = model.embed(&batch).expect("embed");
        assert_eq!(embedding.prompt_and_encoding_len(), 5);

        let data = embedding.input_embeds.to_data();
        let values = data.as_slice::<f32>().expect("values");
        // Positions 0..3 hold adapted audio frames (0th, 2nd, 4th feature
        // rows); positions 3..5 hold the prompt token embeddings.
        assert_eq!(values[0], 100.0);
        assert_eq!(values[dim], 102.0);
        assert_eq!(values[2 * dim], 104.0);
        assert_eq!(values[3 * dim], 10.0);
        assert_eq!(values[4 * dim], 11.0);
    }

    #[test]
    fn dimension_mismatch_is_rejected_at_construction() {
        let err = SpeechLmModel::<B>::new(
            Box::new(IdentityEncoder { dim: 4 }),
            Box::new(StrideAdapter { rate: 2, dim: 4 }),
            Box::new(ConstantLm { dim: 8 }),
            GenerationConfig::default(),
            Precision::Float32,
        )
        .map(|_| ())
        .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn teacher_forcing_extends_the_sequence() {
        let dim = 4;
        let device = NdArrayDevice::default();
        let examples = vec![example(4, &[10], dim)];
        let batch = collate::<B>(&examples, 0, &device).expect("collate");
        let model = model(dim);

        let embedding = model.embed(&batch).expect("embed");
        let (embeds, mask) = embedding.example(0);
        let hidden = model
            .forward_with_hidden_states(embeds, mask, &[5, 6])
            .expect("forward");
        assert_eq!(hidden.dims(), [1, embedding.prompt_and_encoding_len() + 2, dim]);
    }
}
